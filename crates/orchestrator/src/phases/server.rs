use std::sync::Arc;

use async_trait::async_trait;
use probe::{ServerManager, ServerSource};

use crate::core::{PhaseBody, PhaseScope};
use crate::error::PhaseError;

/// Makes sure the server under test is up, per the manager's policy.
///
/// A server started here belongs to the manager, not to the phase, so it
/// keeps running for the phases that follow.
pub struct ServerPhase {
    manager: Arc<ServerManager>,
}

impl ServerPhase {
    pub fn new(manager: Arc<ServerManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PhaseBody for ServerPhase {
    async fn run(&self, _scope: &PhaseScope) -> Result<String, PhaseError> {
        let url = self.manager.probe().base_url();
        match self.manager.ensure_available().await? {
            ServerSource::Reused => Ok(format!("reusing server at {}", url)),
            ServerSource::Spawned { pid } => {
                Ok(format!("started server at {} (pid {})", url, pid))
            }
        }
    }

    fn describe(&self) -> String {
        format!("ensuring server at {}", self.manager.probe().base_url())
    }
}
