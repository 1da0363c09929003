use async_trait::async_trait;
use supervisor::CommandSpec;
use tracing::debug;

use crate::core::{PhaseBody, PhaseScope};
use crate::error::PhaseError;

/// Runs an external command; succeeds iff it exits with status 0.
#[derive(Debug, Clone)]
pub struct CommandPhase {
    spec: CommandSpec,
}

impl CommandPhase {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}

#[async_trait]
impl PhaseBody for CommandPhase {
    async fn run(&self, scope: &PhaseScope) -> Result<String, PhaseError> {
        let handle = scope.spawn(&self.spec)?;
        let output = handle.wait_with_output().await;
        debug!(
            phase = %scope.phase(),
            pid = handle.pid(),
            exit = %output.exit,
            "Command finished"
        );

        if output.exit.success() {
            return Ok(output.combined());
        }

        Err(PhaseError::Exit {
            program: self.spec.program.clone(),
            code: output.exit.code,
            exit: output.exit.to_string(),
            stderr: output.stderr.clone(),
            output: output.combined(),
        })
    }

    fn describe(&self) -> String {
        self.spec.display()
    }
}
