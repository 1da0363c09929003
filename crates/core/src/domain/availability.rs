use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Healthy,
    /// Nothing listens on the port; the server is definitely not running
    Refused,
    /// The probe deadline elapsed; the server may be overloaded or starting
    Timeout,
    OtherError,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Refused => "refused",
            Self::Timeout => "timeout",
            Self::OtherError => "other_error",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOutcome {
    pub available: bool,
    pub classification: Classification,
    pub raw_detail: String,
}

impl AvailabilityOutcome {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            available: true,
            classification: Classification::Healthy,
            raw_detail: detail.into(),
        }
    }

    pub fn unavailable(classification: Classification, detail: impl Into<String>) -> Self {
        Self {
            available: false,
            classification,
            raw_detail: detail.into(),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: String,
    pub timestamp: String,
    pub service: String,
}

impl HealthPayload {
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }

    /// Checks the payload is well formed, returning the reason when not.
    pub fn validate(&self, expected_service: Option<&str>) -> Result<(), CoreError> {
        if self.status != "healthy" {
            return Err(CoreError::Validation(format!(
                "server reports status '{}'",
                self.status
            )));
        }
        if self.parsed_timestamp().is_none() {
            return Err(CoreError::Validation(format!(
                "invalid timestamp '{}'",
                self.timestamp
            )));
        }
        if let Some(expected) = expected_service {
            if self.service != expected {
                return Err(CoreError::Validation(format!(
                    "unexpected service '{}' (expected '{}')",
                    self.service, expected
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: &str, timestamp: &str, service: &str) -> HealthPayload {
        HealthPayload {
            status: status.to_string(),
            timestamp: timestamp.to_string(),
            service: service.to_string(),
        }
    }

    #[test]
    fn test_valid_payload() {
        let p = payload("healthy", "2024-01-01T00:00:00Z", "x");
        assert!(p.validate(None).is_ok());
        assert!(p.validate(Some("x")).is_ok());
    }

    #[test]
    fn test_wrong_service() {
        let p = payload("healthy", "2024-01-01T00:00:00Z", "x");
        let err = p.validate(Some("simple-web-stack-backend")).unwrap_err();
        assert!(err.to_string().contains("unexpected service"));
    }

    #[test]
    fn test_bad_timestamp() {
        let p = payload("healthy", "yesterday", "x");
        assert!(p.validate(None).unwrap_err().to_string().contains("invalid timestamp"));
    }

    #[test]
    fn test_unhealthy_status() {
        let p = payload("degraded", "2024-01-01T00:00:00+02:00", "x");
        assert!(p.validate(None).unwrap_err().to_string().contains("degraded"));
    }

    #[test]
    fn test_payload_deserialization() {
        let json = r#"{"status":"healthy","timestamp":"2024-01-01T00:00:00Z","service":"x"}"#;
        let p: HealthPayload = serde_json::from_str(json).unwrap();
        assert_eq!(p.service, "x");
        assert!(p.parsed_timestamp().is_some());
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = AvailabilityOutcome::healthy("200 OK");
        assert!(ok.available);
        assert_eq!(ok.classification, Classification::Healthy);

        let refused = AvailabilityOutcome::unavailable(Classification::Refused, "refused");
        assert!(!refused.available);
        assert_eq!(refused.classification.to_string(), "refused");
    }
}
