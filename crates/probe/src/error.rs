use stackcheck_core::Classification;
use supervisor::SupervisorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Server at {url} is not available ({classification}): {detail}\n\n{guidance}")]
    Unavailable {
        url: String,
        classification: Classification,
        detail: String,
        guidance: String,
    },

    #[error("Server policy is spawn-if-absent but no launch command is configured")]
    NoLaunchCommand,

    #[error(
        "Server at {url} did not become healthy within {waited_ms}ms{}",
        stderr_suffix(.stderr)
    )]
    StartupTimeout {
        url: String,
        waited_ms: u64,
        stderr: String,
    },

    #[error("Server process exited before becoming healthy ({exit}){}", stderr_suffix(.stderr))]
    ServerExited { exit: String, stderr: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl ProbeError {
    /// Classification of the last probe, when the error came from one.
    pub fn classification(&self) -> Option<Classification> {
        match self {
            Self::Unavailable { classification, .. } => Some(*classification),
            Self::StartupTimeout { .. } => Some(Classification::Timeout),
            _ => None,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n--- server stderr ---\n{}", trimmed)
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
