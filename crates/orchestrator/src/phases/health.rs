use async_trait::async_trait;
use probe::AvailabilityProbe;

use crate::core::{PhaseBody, PhaseScope};
use crate::error::PhaseError;

/// One health probe; succeeds iff the server reports healthy.
#[derive(Debug, Clone)]
pub struct HealthPhase {
    probe: AvailabilityProbe,
}

impl HealthPhase {
    pub fn new(probe: AvailabilityProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl PhaseBody for HealthPhase {
    async fn run(&self, _scope: &PhaseScope) -> Result<String, PhaseError> {
        let outcome = self.probe.check().await;
        if outcome.available {
            Ok(outcome.raw_detail)
        } else {
            Err(PhaseError::Availability {
                classification: outcome.classification,
                detail: outcome.raw_detail,
            })
        }
    }

    fn describe(&self) -> String {
        format!("GET {}", self.probe.health_url())
    }
}
