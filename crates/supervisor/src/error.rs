use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process {pid} still running {waited_ms}ms after forced kill")]
    KillTimeout { pid: u32, waited_ms: u64 },
}

impl SupervisorError {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn kill_timeout(pid: u32, waited: Duration) -> Self {
        Self::KillTimeout {
            pid,
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The executable does not exist or is not on `PATH`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Spawn { source, .. } if source.kind() == io::ErrorKind::PermissionDenied
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
