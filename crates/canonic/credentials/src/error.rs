use canonic_types::AggregateResult;
use thiserror::Error;

/// Failures reported by a [`TokenProvider`](crate::TokenProvider).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying.
    #[error("token provider unavailable: {0}")]
    Transient(String),

    /// The provider refused; retrying will not help.
    #[error("token request denied: {0}")]
    Denied(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unauthorized credential access: {reason}")]
    Unauthorized {
        reason: String,
        /// Validation that refused access, when there was one.
        validation: Option<Box<AggregateResult>>,
    },

    #[error("credential for scope {scope} still expired after {attempts} refresh attempts")]
    CredentialExpired { scope: String, attempts: u32 },

    #[error("credential acquisition for scope {scope} timed out after {timeout_ms}ms")]
    Timeout { scope: String, timeout_ms: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl CredentialError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CredentialError::Unauthorized { .. })
    }
}
