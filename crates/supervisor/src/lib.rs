//! Spawning, observing and reclaiming child processes.
//!
//! - [`ProcessSupervisor`] - spawns processes and is the only thing that signals them
//! - [`ProcessHandle`] - observe a process: wait, read captured output
//! - [`CommandSpec`] - what to run, where, with which environment

mod command;
mod error;
mod process;
mod supervisor;

pub use command::CommandSpec;
pub use error::{Result, SupervisorError};
pub use process::{ExitInfo, ProcessHandle, ProcessOutput, Termination, TerminationStage};
pub use supervisor::{ProcessSupervisor, DEFAULT_GRACE_PERIOD, DEFAULT_KILL_TIMEOUT};
