use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;
use crate::serde_millis;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    /// A dependency did not succeed, so the body was never attempted
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Skipped
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record of one phase.
///
/// Only the constructors below produce values, so the status and the
/// derived `success` / `timed_out` flags always agree: a timed-out phase is
/// never successful and a failed phase always carries an error message.
/// Deserialized values are checked against the same rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PhaseResultRecord")]
pub struct PhaseResult {
    name: String,
    status: PhaseStatus,
    success: bool,
    timed_out: bool,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(rename = "duration_ms", with = "serde_millis")]
    duration: Duration,
}

/// Wire shape of [`PhaseResult`] before validation.
#[derive(Deserialize)]
struct PhaseResultRecord {
    name: String,
    status: PhaseStatus,
    success: bool,
    timed_out: bool,
    output: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(rename = "duration_ms", with = "serde_millis")]
    duration: Duration,
}

impl TryFrom<PhaseResultRecord> for PhaseResult {
    type Error = CoreError;

    fn try_from(record: PhaseResultRecord) -> Result<Self, Self::Error> {
        let problem = if !record.status.is_terminal() {
            Some("status is not terminal")
        } else if record.success != (record.status == PhaseStatus::Succeeded) {
            Some("success flag disagrees with status")
        } else if record.timed_out != (record.status == PhaseStatus::TimedOut) {
            Some("timed_out flag disagrees with status")
        } else if record.success == record.error_message.is_some() {
            Some("error message must be present exactly when the phase failed")
        } else {
            None
        };
        if let Some(problem) = problem {
            return Err(CoreError::Validation(format!(
                "phase result '{}': {}",
                record.name, problem
            )));
        }

        Ok(Self {
            name: record.name,
            status: record.status,
            success: record.success,
            timed_out: record.timed_out,
            output: record.output,
            error_message: record.error_message,
            duration: record.duration,
        })
    }
}

impl PhaseResult {
    pub fn succeeded(
        name: impl Into<String>,
        output: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Succeeded,
            success: true,
            timed_out: false,
            output: output.into(),
            error_message: None,
            duration,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        output: impl Into<String>,
        error_message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Failed,
            success: false,
            timed_out: false,
            output: output.into(),
            error_message: Some(error_message.into()),
            duration,
        }
    }

    pub fn timed_out(
        name: impl Into<String>,
        output: impl Into<String>,
        deadline: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::TimedOut,
            success: false,
            timed_out: true,
            output: output.into(),
            error_message: Some(format!("timed out after {}ms", deadline.as_millis())),
            duration,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Skipped,
            success: false,
            timed_out: false,
            output: String::new(),
            error_message: Some(reason.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_skipped(&self) -> bool {
        self.status == PhaseStatus::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_str() {
        for status in [
            PhaseStatus::Pending,
            PhaseStatus::Running,
            PhaseStatus::Succeeded,
            PhaseStatus::Failed,
            PhaseStatus::TimedOut,
            PhaseStatus::Skipped,
        ] {
            assert_eq!(PhaseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PhaseStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
        assert!(PhaseStatus::Succeeded.is_terminal());
        assert!(PhaseStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_timed_out_is_never_success() {
        let result = PhaseResult::timed_out(
            "integration",
            "",
            Duration::from_millis(5000),
            Duration::from_millis(5001),
        );
        assert!(result.is_timed_out());
        assert!(!result.is_success());
        assert_eq!(result.status(), PhaseStatus::TimedOut);
        assert_eq!(result.error_message(), Some("timed out after 5000ms"));
    }

    #[test]
    fn test_failed_carries_message() {
        let result = PhaseResult::failed("unit", "out", "exit code 101", Duration::from_secs(1));
        assert!(!result.is_success());
        assert!(!result.is_timed_out());
        assert_eq!(result.error_message(), Some("exit code 101"));
        assert_eq!(result.output(), "out");
    }

    #[test]
    fn test_skipped_has_zero_duration() {
        let result = PhaseResult::skipped("test", "dependency 'build' did not succeed");
        assert!(result.is_skipped());
        assert!(!result.is_success());
        assert_eq!(result.duration(), Duration::ZERO);
    }

    #[test]
    fn test_result_serialization() {
        let result = PhaseResult::succeeded("build", "ok", Duration::from_millis(250));
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"succeeded\""));
        assert!(json.contains("\"duration_ms\":250"));
        assert!(!json.contains("error_message"));

        let back: PhaseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_inconsistent_result_is_rejected() {
        let both = r#"{"name":"unit","status":"timed_out","success":true,"timed_out":true,
            "output":"","error_message":"timed out after 5000ms","duration_ms":5000}"#;
        let err = serde_json::from_str::<PhaseResult>(both).unwrap_err();
        assert!(err.to_string().contains("success flag disagrees with status"));

        let running = r#"{"name":"unit","status":"running","success":false,"timed_out":false,
            "output":"","error_message":"x","duration_ms":0}"#;
        assert!(serde_json::from_str::<PhaseResult>(running).is_err());

        let silent_failure = r#"{"name":"unit","status":"failed","success":false,
            "timed_out":false,"output":"","duration_ms":10}"#;
        assert!(serde_json::from_str::<PhaseResult>(silent_failure).is_err());
    }
}
