//! Lifecycle events emitted while a run executes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackcheck_core::{Classification, PhaseStatus};
use uuid::Uuid;

/// Envelope wrapping every event with the run it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// Run that produced the event
    pub run_id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: RunEvent,
}

impl EventEnvelope {
    pub fn new(run_id: Uuid, event: RunEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    #[serde(rename = "run.started")]
    RunStarted { phases: Vec<String> },

    #[serde(rename = "phase.started")]
    PhaseStarted { phase: String, timeout_ms: u64 },

    /// Terminal state reached by an attempted phase
    #[serde(rename = "phase.finished")]
    PhaseFinished {
        phase: String,
        status: PhaseStatus,
        duration_ms: u64,
    },

    #[serde(rename = "phase.skipped")]
    PhaseSkipped { phase: String, reason: String },

    /// A healthy server was found and will be reused without being owned
    #[serde(rename = "server.reused")]
    ServerReused { url: String },

    #[serde(rename = "server.spawned")]
    ServerSpawned { url: String, pid: u32 },

    #[serde(rename = "server.unavailable")]
    ServerUnavailable {
        url: String,
        classification: Classification,
    },

    #[serde(rename = "run.finished")]
    RunFinished { success: bool, total_duration_ms: u64 },
}

impl RunEvent {
    /// Phase this event refers to, if any
    pub fn phase(&self) -> Option<&str> {
        match self {
            RunEvent::PhaseStarted { phase, .. }
            | RunEvent::PhaseFinished { phase, .. }
            | RunEvent::PhaseSkipped { phase, .. } => Some(phase),
            _ => None,
        }
    }
}
