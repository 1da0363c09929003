//! `stackcheck watch`: keep a test watcher running until told to stop.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use supervisor::{CommandSpec, ExitInfo, ProcessSupervisor, Termination};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The watcher ended on its own
    Exited(ExitInfo),
    /// `stop` completed first and the watcher was terminated
    Stopped(Termination),
}

impl WatchOutcome {
    pub fn success(&self) -> bool {
        match self {
            WatchOutcome::Exited(exit) => exit.success(),
            WatchOutcome::Stopped(_) => true,
        }
    }
}

/// Run the watcher described by `spec` until it exits or `stop` completes.
///
/// The watcher is terminated even when `stop` reports an error.
pub async fn run<S>(
    spec: &CommandSpec,
    supervisor: &ProcessSupervisor,
    grace_period: Duration,
    stop: S,
) -> Result<WatchOutcome>
where
    S: Future<Output = Result<()>>,
{
    let handle = supervisor
        .spawn(spec)
        .with_context(|| format!("Failed to start watcher '{}'", spec.display()))?;
    info!(pid = handle.pid(), command = %spec.display(), "Watcher started");

    tokio::select! {
        exit = handle.wait() => Ok(WatchOutcome::Exited(exit)),
        stopped = stop => {
            info!("Stopping watcher");
            let termination = supervisor.terminate(&handle, grace_period).await?;
            stopped.context("Failed to listen for shutdown signals")?;
            Ok(WatchOutcome::Stopped(termination))
        }
    }
}
