use supervisor::{CommandSpec, ProcessHandle, ProcessSupervisor};

use crate::deadline::ExpiryGuard;
use crate::error::PhaseError;

/// What a running phase body can reach.
///
/// Processes spawned through the scope belong to the phase and are
/// terminated once the phase ends, whether it finished or timed out.
#[derive(Debug, Clone)]
pub struct PhaseScope {
    phase: String,
    supervisor: ProcessSupervisor,
    expiry: ExpiryGuard,
}

impl PhaseScope {
    pub fn new(
        phase: impl Into<String>,
        supervisor: ProcessSupervisor,
        expiry: ExpiryGuard,
    ) -> Self {
        Self {
            phase: phase.into(),
            supervisor,
            expiry,
        }
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Spawn a process owned by this phase.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle, PhaseError> {
        tracing::debug!(
            phase = %self.phase,
            command = %spec.display(),
            "Spawning phase process"
        );
        Ok(self.supervisor.spawn(spec)?)
    }

    /// Whether the phase deadline has already elapsed.
    pub fn is_expired(&self) -> bool {
        self.expiry.is_fired()
    }

    /// Completes when the phase deadline elapses.
    pub async fn expired(&self) {
        self.expiry.expired().await
    }
}
