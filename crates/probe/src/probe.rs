use std::error::Error as _;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use stackcheck_core::{AvailabilityOutcome, Classification, HealthPayload};
use tracing::debug;

use crate::error::Result;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Single bounded health check against `<base>/health`.
///
/// Never retries and never errors: every failure is folded into the
/// returned [`AvailabilityOutcome`].
#[derive(Debug, Clone)]
pub struct AvailabilityProbe {
    base_url: String,
    client: Client,
    timeout: Duration,
    expected_service: Option<String>,
}

impl AvailabilityProbe {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout,
            expected_service: None,
        })
    }

    /// Require the payload's `service` field to equal `service`.
    pub fn expect_service(mut self, service: impl Into<String>) -> Self {
        self.expected_service = Some(service.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn check(&self) -> AvailabilityOutcome {
        let url = self.health_url();
        let outcome = self.fetch(&url).await;
        debug!(
            url = %url,
            classification = %outcome.classification,
            detail = %outcome.raw_detail,
            "Health probe finished"
        );
        outcome
    }

    async fn fetch(&self, url: &str) -> AvailabilityOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return AvailabilityOutcome::unavailable(classify(&e), describe(&e)),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return AvailabilityOutcome::unavailable(
                Classification::OtherError,
                format!("server responded with status {}", status.as_u16()),
            );
        }

        let payload: HealthPayload = match response.json().await {
            Ok(payload) => payload,
            Err(e) if e.is_timeout() => {
                return AvailabilityOutcome::unavailable(Classification::Timeout, describe(&e))
            }
            Err(e) => {
                return AvailabilityOutcome::unavailable(
                    Classification::OtherError,
                    format!("malformed health payload: {}", describe(&e)),
                )
            }
        };

        match payload.validate(self.expected_service.as_deref()) {
            Ok(()) => AvailabilityOutcome::healthy(format!(
                "{} healthy at {}",
                payload.service, payload.timestamp
            )),
            Err(e) => AvailabilityOutcome::unavailable(Classification::OtherError, e.to_string()),
        }
    }
}

/// Map a transport error onto the probe's classification.
fn classify(err: &reqwest::Error) -> Classification {
    if err.is_timeout() {
        return Classification::Timeout;
    }
    if is_connection_refused(err) {
        return Classification::Refused;
    }
    Classification::OtherError
}

fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Error message including its causes, which reqwest keeps out of Display.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
