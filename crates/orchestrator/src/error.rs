use probe::ProbeError;
use stackcheck_core::Classification;
use supervisor::SupervisorError;
use thiserror::Error;

/// Errors that abort a run before any phase executes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid run configuration: {0}")]
    Config(String),

    #[error("Invalid phase state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl OrchestratorError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Misconfiguration that should stop the process with a distinct exit code.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Why a phase body failed. Always captured into the phase's result.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Spawn(#[from] SupervisorError),

    #[error("{program} failed with {exit}{}", stderr_tail(.stderr))]
    Exit {
        program: String,
        code: Option<i32>,
        exit: String,
        stderr: String,
        /// Everything the process printed, for the phase result
        output: String,
    },

    #[error("Server unavailable ({classification}): {detail}")]
    Availability {
        classification: Classification,
        detail: String,
    },

    #[error(transparent)]
    Server(ProbeError),

    #[error("{0}")]
    Failed(String),
}

impl PhaseError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Output produced before the failure, if any was captured.
    pub fn output(&self) -> &str {
        match self {
            Self::Exit { output, .. } => output,
            _ => "",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => *code,
            _ => None,
        }
    }

    pub fn classification(&self) -> Option<Classification> {
        match self {
            Self::Availability { classification, .. } => Some(*classification),
            Self::Server(e) => e.classification(),
            _ => None,
        }
    }
}

impl From<ProbeError> for PhaseError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Supervisor(e) => Self::Spawn(e),
            other => Self::Server(other),
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    const MAX_LINES: usize = 20;

    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(MAX_LINES);
    format!("\n{}", lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_error_message_keeps_stderr_tail() {
        let stderr: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let err = PhaseError::Exit {
            program: "cargo".to_string(),
            code: Some(101),
            exit: "exit code 101".to_string(),
            stderr,
            output: "running 3 tests".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("cargo failed with exit code 101\nline 11"));
        assert!(!msg.contains("line 10\n"));
        assert!(msg.ends_with("line 30"));
        assert_eq!(err.exit_code(), Some(101));
        assert_eq!(err.output(), "running 3 tests");
    }

    #[test]
    fn test_availability_errors_keep_classification() {
        let err = PhaseError::from(ProbeError::Unavailable {
            url: "http://localhost:3000".to_string(),
            classification: Classification::Refused,
            detail: "connection refused".to_string(),
            guidance: String::new(),
        });
        assert_eq!(err.classification(), Some(Classification::Refused));
        assert_eq!(err.output(), "");
    }

    #[test]
    fn test_config_error() {
        let err = OrchestratorError::config("no phases to run");
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Invalid run configuration: no phases to run");
    }
}
