use canonic_ledger::LedgerError;
use canonic_types::{ContextError, Fingerprint};
use thiserror::Error;

use crate::state::ActionState;

/// Failures that prevent an action from being recorded at all.
///
/// Outcome-level failures (blocked, send failed, cancelled) are not errors;
/// they are reported in the [`ActionReport`](crate::ActionReport).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: ActionState, to: ActionState },

    #[error("invalid request: {0}")]
    Context(#[from] ContextError),

    /// Another attempt at the same action is running, or a `Pending` entry
    /// awaits reconciliation.
    #[error("{fingerprint} is already in flight")]
    AlreadyInFlight {
        fingerprint: Fingerprint,
        sequence: Option<u64>,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
