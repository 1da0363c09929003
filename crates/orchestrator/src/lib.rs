//! Phase orchestration: bounded phases run in order against a shared
//! server, with every outcome captured in one [`RunReport`](stackcheck_core::RunReport).

pub mod core;
pub mod deadline;
pub mod error;
pub mod phases;
pub mod progress;
pub mod sequencer;
pub mod state_machine;

pub use core::{Phase, PhaseBody, PhaseScope};
pub use deadline::{race, ExpiryGuard, TimedOut};
pub use error::{OrchestratorError, PhaseError, Result};
pub use phases::{CommandPhase, FnPhase, HealthPhase, PrerequisitePhase, ServerPhase};
pub use progress::{ProgressMode, ProgressReporter};
pub use sequencer::{PhaseSequencer, SequencerConfig, INTERRUPTED};
pub use state_machine::{PhaseState, PhaseStateMachine};
