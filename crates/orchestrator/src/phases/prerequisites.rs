use std::time::Duration;

use async_trait::async_trait;
use supervisor::CommandSpec;
use tracing::{debug, warn};

use crate::core::{PhaseBody, PhaseScope};
use crate::error::PhaseError;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks that every required tool answers `<tool> --version`.
#[derive(Debug, Clone)]
pub struct PrerequisitePhase {
    tools: Vec<String>,
    check_timeout: Duration,
}

enum ToolStatus {
    Present(String),
    Missing(String),
}

impl PrerequisitePhase {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            check_timeout: VERSION_CHECK_TIMEOUT,
        }
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &[String] {
        &self.tools
    }

    async fn check(&self, scope: &PhaseScope, tool: &str) -> ToolStatus {
        let spec = CommandSpec::new(tool).arg("--version");
        let handle = match scope.supervisor().spawn(&spec) {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => {
                return ToolStatus::Missing("not found in PATH".to_string())
            }
            Err(e) if e.is_permission_denied() => {
                warn!(tool, error = %e, "Version check could not run");
                return ToolStatus::Missing("could not run: permission denied".to_string());
            }
            Err(e) => {
                warn!(tool, error = %e, "Version check could not run");
                return ToolStatus::Missing(format!("could not run: {}", e));
            }
        };

        match tokio::time::timeout(self.check_timeout, handle.wait_with_output()).await {
            Ok(output) if output.exit.success() => {
                let version = output
                    .stdout
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                ToolStatus::Present(version)
            }
            Ok(output) => ToolStatus::Missing(format!("--version failed with {}", output.exit)),
            Err(_) => ToolStatus::Missing(format!(
                "--version did not finish within {}ms",
                self.check_timeout.as_millis()
            )),
        }
    }
}

#[async_trait]
impl PhaseBody for PrerequisitePhase {
    async fn run(&self, scope: &PhaseScope) -> Result<String, PhaseError> {
        let mut report = Vec::with_capacity(self.tools.len());
        let mut missing = Vec::new();

        for tool in &self.tools {
            match self.check(scope, tool).await {
                ToolStatus::Present(version) => {
                    debug!(tool = %tool, version = %version, "Prerequisite found");
                    report.push(format!("{}: {}", tool, version));
                }
                ToolStatus::Missing(reason) => {
                    report.push(format!("{}: missing ({})", tool, reason));
                    missing.push(tool.as_str());
                }
            }
        }

        if missing.is_empty() {
            Ok(report.join("\n"))
        } else {
            Err(PhaseError::failed(format!(
                "missing prerequisites: {}. Install them and make sure they are on PATH.\n{}",
                missing.join(", "),
                report.join("\n")
            )))
        }
    }

    fn describe(&self) -> String {
        format!("checking {}", self.tools.join(", "))
    }
}
