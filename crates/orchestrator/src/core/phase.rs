//! The phase abstraction the sequencer runs.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PhaseError;

use super::scope::PhaseScope;

/// Work performed by a phase.
///
/// Implementations must be cancel safe at every await point: when the
/// phase deadline elapses the future is dropped, and any process spawned
/// through the [`PhaseScope`] is torn down by the sequencer afterwards.
#[async_trait]
pub trait PhaseBody: Send + Sync {
    /// Run the phase, returning its captured output on success.
    async fn run(&self, scope: &PhaseScope) -> Result<String, PhaseError>;

    /// Short human-readable description used in progress output.
    fn describe(&self) -> String {
        String::new()
    }
}

/// A named, bounded unit of work in a run.
#[derive(Clone)]
pub struct Phase {
    name: String,
    timeout: Duration,
    body: Arc<dyn PhaseBody>,
    depends_on: Vec<String>,
    gate: bool,
}

impl Phase {
    pub fn new(name: impl Into<String>, timeout: Duration, body: impl PhaseBody + 'static) -> Self {
        Self::from_arc(name, timeout, Arc::new(body))
    }

    pub fn from_arc(name: impl Into<String>, timeout: Duration, body: Arc<dyn PhaseBody>) -> Self {
        Self {
            name: name.into(),
            timeout,
            body,
            depends_on: Vec::new(),
            gate: false,
        }
    }

    /// Only run this phase if `phase` succeeded. `phase` must be declared earlier.
    pub fn depends_on(mut self, phase: impl Into<String>) -> Self {
        self.depends_on.push(phase.into());
        self
    }

    /// Every later phase is skipped unless this one succeeds.
    pub fn gate(mut self) -> Self {
        self.gate = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn body(&self) -> &dyn PhaseBody {
        self.body.as_ref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_gate(&self) -> bool {
        self.gate
    }

    /// Label shown by the progress reporter.
    pub fn label(&self) -> String {
        let description = self.body.describe();
        if description.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, description)
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("depends_on", &self.depends_on)
            .field("gate", &self.gate)
            .finish()
    }
}
