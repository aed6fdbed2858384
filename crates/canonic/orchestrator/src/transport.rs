use async_trait::async_trait;
use canonic_credentials::Credential;
use canonic_types::{ActionContext, DeliveryReceipt};
use thiserror::Error;

/// Transport failures, classified for the retry loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network blips, throttling, 5xx. Retried with backoff.
    #[error("transient transport failure: {0}")]
    Retryable(String),

    /// Rejected by the provider; retrying will not help.
    #[error("transport rejected message: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Retryable(_))
    }
}

/// Delivers an action.
///
/// Implementations must be idempotent per context fingerprint: sending the
/// same context twice may not produce two deliveries.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        context: &ActionContext,
        credential: &Credential,
    ) -> Result<DeliveryReceipt, TransportError>;
}
