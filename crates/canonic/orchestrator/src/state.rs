use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// Lifecycle of one action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Built,
    Validating,
    Validated,
    Blocked,
    Cancelled,
    Sending,
    Sent,
    SendFailed,
    Logging,
    Logged,
}

impl ActionState {
    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (Built, Validating)
                | (Built, Blocked)
                | (Built, Cancelled)
                // Duplicate of an already logged action.
                | (Built, Logged)
                | (Validating, Blocked)
                | (Validating, Validated)
                | (Validating, Cancelled)
                | (Validated, Sending)
                | (Validated, Blocked)
                | (Validated, SendFailed)
                | (Validated, Cancelled)
                | (Sending, Sent)
                | (Sending, SendFailed)
                | (Blocked, Logging)
                | (Cancelled, Logging)
                | (Sent, Logging)
                | (SendFailed, Logging)
                | (Logging, Logged)
        )
    }

    pub fn is_final(self) -> bool {
        self == ActionState::Logged
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionState::Built => "built",
            ActionState::Validating => "validating",
            ActionState::Validated => "validated",
            ActionState::Blocked => "blocked",
            ActionState::Cancelled => "cancelled",
            ActionState::Sending => "sending",
            ActionState::Sent => "sent",
            ActionState::SendFailed => "send_failed",
            ActionState::Logging => "logging",
            ActionState::Logged => "logged",
        };
        f.write_str(name)
    }
}

/// Current state plus the path taken to reach it.
#[derive(Clone, Debug)]
pub struct StateMachine {
    current: ActionState,
    path: Vec<ActionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: ActionState::Built,
            path: vec![ActionState::Built],
        }
    }

    pub fn current(&self) -> ActionState {
        self.current
    }

    pub fn path(&self) -> &[ActionState] {
        &self.path
    }

    pub fn advance(&mut self, next: ActionState) -> Result<(), OrchestratorError> {
        if !self.current.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        tracing::trace!(from = %self.current, to = %next, "Action state transition");
        self.current = next;
        self.path.push(next);
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let mut sm = StateMachine::new();
        for s in [
            ActionState::Validating,
            ActionState::Validated,
            ActionState::Sending,
            ActionState::Sent,
            ActionState::Logging,
            ActionState::Logged,
        ] {
            sm.advance(s).unwrap();
        }
        assert!(sm.current().is_final());
        assert_eq!(sm.path().len(), 7);
    }

    #[test]
    fn cannot_skip_validation() {
        let mut sm = StateMachine::new();
        let err = sm.advance(ActionState::Sending).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidTransition {
                from: ActionState::Built,
                to: ActionState::Sending
            }
        ));
        assert_eq!(sm.current(), ActionState::Built);
    }

    #[test]
    fn cancellation_not_allowed_once_sending() {
        assert!(ActionState::Validated.can_transition_to(ActionState::Cancelled));
        assert!(!ActionState::Sending.can_transition_to(ActionState::Cancelled));
        assert!(!ActionState::Logged.can_transition_to(ActionState::Logging));
    }
}
