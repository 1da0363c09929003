use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::CommandSpec;
use crate::error::{Result, SupervisorError};
use crate::process::{ProcessHandle, Termination};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns every process it spawns and is the only component allowed to
/// terminate them.
///
/// Clones share the same set of processes.
#[derive(Clone)]
pub struct ProcessSupervisor {
    processes: Arc<Mutex<Vec<ProcessHandle>>>,
    kill_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(Mutex::new(Vec::new())),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// Bound on the wait after a forced kill.
    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }

    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }

    /// Start `spec` with stdout/stderr captured unless the spec inherits them.
    ///
    /// On unix the child leads its own process group so that termination
    /// also reaches anything it spawned.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<ProcessHandle> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        if spec.inherit_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::spawn(&spec.program, e))?;

        let handle = ProcessHandle::start(child, spec.display())?;
        info!(pid = handle.pid(), command = %handle.label(), "Spawned process");

        if let Ok(mut processes) = self.processes.lock() {
            processes.retain(ProcessHandle::is_running);
            processes.push(handle.clone());
        }

        Ok(handle)
    }

    /// Stop `handle`: graceful signal, then a forced kill once
    /// `grace_period` elapses.
    ///
    /// Idempotent. A process that already exited is never signalled and
    /// repeated calls return the first call's [`Termination`].
    pub async fn terminate(
        &self,
        handle: &ProcessHandle,
        grace_period: Duration,
    ) -> Result<Termination> {
        let termination = handle.terminate(grace_period, self.kill_timeout).await?;
        self.release(handle.pid());
        Ok(termination)
    }

    /// Terminate every process this supervisor still owns.
    ///
    /// Processes are stopped concurrently so the whole teardown is bounded
    /// by one `grace_period + kill_timeout`.
    pub async fn terminate_all(&self, grace_period: Duration) -> Vec<Result<Termination>> {
        let running = self.running();
        if running.is_empty() {
            return Vec::new();
        }

        debug!(count = running.len(), "Terminating owned processes");
        let results = futures::future::join_all(
            running
                .iter()
                .map(|handle| self.terminate(handle, grace_period)),
        )
        .await;

        for result in &results {
            if let Err(e) = result {
                warn!(error = %e, "Process could not be reclaimed");
            }
        }
        results
    }

    /// Processes that have not exited yet.
    pub fn running(&self) -> Vec<ProcessHandle> {
        self.processes
            .lock()
            .map(|processes| {
                processes
                    .iter()
                    .filter(|p| p.is_running())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn release(&self, pid: u32) {
        if let Ok(mut processes) = self.processes.lock() {
            processes.retain(|p| p.pid() != pid);
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("running", &self.running().len())
            .field("kill_timeout", &self.kill_timeout)
            .finish()
    }
}
