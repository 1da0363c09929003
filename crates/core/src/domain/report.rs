use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::phase::{PhaseResult, PhaseStatus};
use crate::serde_millis;

/// Aggregate outcome of one run, built once after the last phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    results: Vec<PhaseResult>,
    success: bool,
    #[serde(rename = "total_duration_ms", with = "serde_millis")]
    total_duration: Duration,
}

impl RunReport {
    pub fn new(results: Vec<PhaseResult>) -> Self {
        let success = results.iter().all(PhaseResult::is_success);
        let total_duration = results.iter().map(PhaseResult::duration).sum();
        Self {
            results,
            success,
            total_duration,
        }
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn count(&self, status: PhaseStatus) -> usize {
        self.results.iter().filter(|r| r.status() == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(PhaseStatus::Succeeded)
    }

    /// Results that were attempted or skipped but did not succeed.
    pub fn unsuccessful(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn get(&self, name: &str) -> Option<&PhaseResult> {
        self.results.iter().find(|r| r.name() == name)
    }
}
