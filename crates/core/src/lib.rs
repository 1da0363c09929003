//! Domain types shared by the stackcheck crates.

pub mod domain;
pub mod error;
pub mod serde_millis;

pub use domain::availability::{AvailabilityOutcome, Classification, HealthPayload};
pub use domain::phase::{PhaseResult, PhaseStatus};
pub use domain::report::RunReport;
pub use error::CoreError;
