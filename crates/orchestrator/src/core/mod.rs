//! Core abstractions of the phase execution model.
//!
//! - [`Phase`] - a named body with a deadline and its dependencies
//! - [`PhaseBody`] - trait every kind of phase implements
//! - [`PhaseScope`] - what a body may touch while it runs

mod phase;
mod scope;

pub use phase::{Phase, PhaseBody};
pub use scope::PhaseScope;
