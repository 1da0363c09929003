use stackcheck_core::PhaseStatus;

use crate::error::{OrchestratorError, Result};

pub struct PhaseStateMachine;

impl PhaseStateMachine {
    pub fn validate_transition(from: &PhaseStatus, to: &PhaseStatus) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &PhaseStatus) -> Vec<PhaseStatus> {
        match from {
            PhaseStatus::Pending => vec![PhaseStatus::Running, PhaseStatus::Skipped],
            PhaseStatus::Running => vec![
                PhaseStatus::Succeeded,
                PhaseStatus::Failed,
                PhaseStatus::TimedOut,
            ],
            PhaseStatus::Succeeded
            | PhaseStatus::Failed
            | PhaseStatus::TimedOut
            | PhaseStatus::Skipped => vec![],
        }
    }

    pub fn can_transition(from: &PhaseStatus, to: &PhaseStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

/// Status of one phase within a run, moved only through valid transitions.
#[derive(Debug, Clone)]
pub struct PhaseState {
    name: String,
    status: PhaseStatus,
}

impl PhaseState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    pub fn transition(&mut self, to: PhaseStatus) -> Result<()> {
        PhaseStateMachine::validate_transition(&self.status, &to)?;
        tracing::trace!(phase = %self.name, from = %self.status, to = %to, "Phase transition");
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Running
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Skipped
        ));
        assert!(PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::TimedOut
        ));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Pending,
            &PhaseStatus::Succeeded
        ));
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Skipped
        ));
        assert!(!PhaseStateMachine::can_transition(
            &PhaseStatus::Running,
            &PhaseStatus::Pending
        ));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            PhaseStatus::Succeeded,
            PhaseStatus::Failed,
            PhaseStatus::TimedOut,
            PhaseStatus::Skipped,
        ] {
            for to in [
                PhaseStatus::Pending,
                PhaseStatus::Running,
                PhaseStatus::Succeeded,
                PhaseStatus::Failed,
                PhaseStatus::TimedOut,
                PhaseStatus::Skipped,
            ] {
                assert!(!PhaseStateMachine::can_transition(&terminal, &to));
            }
        }
    }

    #[test]
    fn test_phase_state_rejects_second_terminal_state() {
        let mut state = PhaseState::new("unit");
        state.transition(PhaseStatus::Running).unwrap();
        state.transition(PhaseStatus::Failed).unwrap();

        let err = state.transition(PhaseStatus::Succeeded).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid phase state transition from failed to succeeded"
        );
        assert_eq!(state.status(), PhaseStatus::Failed);
    }
}
