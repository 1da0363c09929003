//! Concrete [`PhaseBody`](crate::core::PhaseBody) implementations:
//!
//! - [`CommandPhase`] - run an external command, pass iff it exits 0
//! - [`PrerequisitePhase`] - check that required tools are installed
//! - [`ServerPhase`] - reuse or start the server under test
//! - [`HealthPhase`] - a single `/health` probe
//! - [`FnPhase`] - an async closure

mod command;
mod func;
mod health;
mod prerequisites;
mod server;

pub use command::CommandPhase;
pub use func::FnPhase;
pub use health::HealthPhase;
pub use prerequisites::PrerequisitePhase;
pub use server::ServerPhase;
