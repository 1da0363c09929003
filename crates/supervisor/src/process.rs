//! Handle to a spawned child process.
//!
//! Each child is owned by a single monitor task. The monitor is the only
//! code that delivers signals, and it stops accepting signal requests the
//! moment it has reaped the child, so a handle can never signal a pid that
//! the OS may already have handed to another process.

use std::process::ExitStatus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};

/// How long to keep draining pipes after the child exited.
///
/// Grandchildren that inherited stdout/stderr can hold the pipes open past
/// the child's exit; their output is cut off after this.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Exit status could not be retrieved from the OS.
    pub const UNKNOWN: ExitInfo = ExitInfo {
        code: None,
        signal: None,
    };

    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "terminated by signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Which stage of the graceful → forced sequence reclaimed the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStage {
    /// The process had already exited; no signal was sent
    AlreadyExited,
    /// The process exited within the grace period after the stop signal
    Graceful,
    /// The grace period elapsed and the process was killed
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub exit: ExitInfo,
    pub stage: TerminationStage,
}

/// Exit status plus everything captured from stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit: ExitInfo,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Stop,
    Kill,
}

#[derive(Default)]
struct SignalCounts {
    graceful: AtomicU32,
    forced: AtomicU32,
}

struct Shared {
    status: watch::Receiver<Option<ExitInfo>>,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    termination: tokio::sync::Mutex<Option<Termination>>,
    signals: Arc<SignalCounts>,
}

/// Cheap, cloneable reference to a supervised process.
///
/// Handles can observe the process (wait, read captured output) but cannot
/// signal it; only the owning [`ProcessSupervisor`](crate::ProcessSupervisor)
/// terminates processes.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    label: String,
    control: mpsc::UnboundedSender<Control>,
    shared: Arc<Shared>,
}

impl ProcessHandle {
    pub(crate) fn start(mut child: Child, label: String) -> Result<Self> {
        let pid = child.id().ok_or_else(|| {
            SupervisorError::spawn(
                label.clone(),
                std::io::Error::other("child exited before its pid could be read"),
            )
        })?;

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(capture(pipe, Arc::clone(&stdout)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(capture(pipe, Arc::clone(&stderr)));
        }

        let (status_tx, status_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let signals = Arc::new(SignalCounts::default());

        tokio::spawn(monitor(
            child,
            pid,
            control_rx,
            status_tx,
            Arc::clone(&signals),
        ));

        Ok(Self {
            pid,
            label,
            control: control_tx,
            shared: Arc::new(Shared {
                status: status_rx,
                stdout,
                stderr,
                readers: Mutex::new(readers),
                termination: tokio::sync::Mutex::new(None),
                signals,
            }),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exit status if the process has already been reaped.
    pub fn exit_status(&self) -> Option<ExitInfo> {
        *self.shared.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.exit_status().is_none()
    }

    /// Wait for the process to exit.
    ///
    /// Cancel safe: dropping the future leaves the process untouched.
    pub async fn wait(&self) -> ExitInfo {
        let mut status = self.shared.status.clone();
        let exit = match status.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).unwrap_or(ExitInfo::UNKNOWN),
            Err(_) => ExitInfo::UNKNOWN,
        };
        exit
    }

    /// Wait for exit, then collect captured output.
    pub async fn wait_with_output(&self) -> ProcessOutput {
        let exit = self.wait().await;
        self.drain_readers().await;
        ProcessOutput {
            exit,
            stdout: self.stdout_snapshot(),
            stderr: self.stderr_snapshot(),
        }
    }

    pub fn stdout_snapshot(&self) -> String {
        snapshot(&self.shared.stdout)
    }

    pub fn stderr_snapshot(&self) -> String {
        snapshot(&self.shared.stderr)
    }

    /// Number of (graceful, forced) signals actually delivered.
    pub fn signals_sent(&self) -> (u32, u32) {
        (
            self.shared.signals.graceful.load(Ordering::SeqCst),
            self.shared.signals.forced.load(Ordering::SeqCst),
        )
    }

    /// Two-stage teardown. Concurrent and repeated calls share the first
    /// call's outcome, so the process is signalled at most once per stage.
    pub(crate) async fn terminate(
        &self,
        grace_period: Duration,
        kill_timeout: Duration,
    ) -> Result<Termination> {
        let mut memo = self.shared.termination.lock().await;
        if let Some(done) = *memo {
            return Ok(done);
        }

        let termination = match self.exit_status() {
            Some(exit) => Termination {
                exit,
                stage: TerminationStage::AlreadyExited,
            },
            None => self.escalate(grace_period, kill_timeout).await?,
        };

        debug!(
            pid = self.pid,
            label = %self.label,
            stage = ?termination.stage,
            exit = %termination.exit,
            "Process reclaimed"
        );
        *memo = Some(termination);
        Ok(termination)
    }

    async fn escalate(
        &self,
        grace_period: Duration,
        kill_timeout: Duration,
    ) -> Result<Termination> {
        debug!(pid = self.pid, label = %self.label, "Requesting graceful stop");
        let _ = self.control.send(Control::Stop);

        if let Ok(exit) = tokio::time::timeout(grace_period, self.wait()).await {
            return Ok(Termination {
                exit,
                stage: TerminationStage::Graceful,
            });
        }

        warn!(
            pid = self.pid,
            label = %self.label,
            grace_ms = grace_period.as_millis() as u64,
            "Grace period elapsed, killing process"
        );
        let _ = self.control.send(Control::Kill);

        match tokio::time::timeout(kill_timeout, self.wait()).await {
            Ok(exit) => Ok(Termination {
                exit,
                stage: TerminationStage::Forced,
            }),
            Err(_) => Err(SupervisorError::kill_timeout(self.pid, kill_timeout)),
        }
    }

    async fn drain_readers(&self) {
        let readers = match self.shared.readers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };
        for mut reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                debug!(pid = self.pid, "Output pipe still open after exit, abandoning reader");
                reader.abort();
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("label", &self.label)
            .field("exit", &self.exit_status())
            .finish()
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    mut control: mpsc::UnboundedReceiver<Control>,
    status: watch::Sender<Option<ExitInfo>>,
    signals: Arc<SignalCounts>,
) {
    let exit = loop {
        tokio::select! {
            result = child.wait() => {
                break match result {
                    Ok(status) => ExitInfo::from_status(status),
                    Err(e) => {
                        warn!(pid, error = %e, "Failed to wait for child");
                        ExitInfo::UNKNOWN
                    }
                };
            }
            Some(request) = control.recv() => {
                // Still unreaped here, so the pid (and its group) is ours.
                let delivered = match request {
                    Control::Stop => send_stop(&mut child, pid),
                    Control::Kill => send_kill(&mut child, pid),
                };
                match delivered {
                    Ok(()) => {
                        let counter = match request {
                            Control::Stop => &signals.graceful,
                            Control::Kill => &signals.forced,
                        };
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => warn!(pid, ?request, error = %e, "Failed to signal child"),
                }
            }
        }
    };

    debug!(pid, exit = %exit, "Child exited");
    let _ = status.send(Some(exit));
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> std::io::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(std::io::Error::other)?;
    killpg(Pid::from_raw(raw), signal).map_err(std::io::Error::from)
}

#[cfg(unix)]
fn send_stop(_child: &mut Child, pid: u32) -> std::io::Result<()> {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(not(unix))]
fn send_stop(child: &mut Child, _pid: u32) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
fn send_kill(child: &mut Child, pid: u32) -> std::io::Result<()> {
    // The group kill reaches grandchildren; start_kill covers a leader that
    // somehow left its group.
    let group = signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    child.start_kill().or(group)
}

#[cfg(not(unix))]
fn send_kill(child: &mut Child, _pid: u32) -> std::io::Result<()> {
    child.start_kill()
}

fn capture<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut out) = sink.lock() {
                        out.extend_from_slice(&buf[..n]);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Output pipe read failed");
                    break;
                }
            }
        }
    })
}

fn snapshot(buffer: &Mutex<Vec<u8>>) -> String {
    buffer
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
