use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::error::ProviderError;

/// A token as issued by the identity provider.
pub struct IssuedToken {
    pub secret: Zeroizing<String>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            expires_at,
        }
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of access tokens (OAuth or otherwise). Implementations own the
/// acquisition protocol; the gate only sees tokens and expiries.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch(&self, scope: &str) -> Result<IssuedToken, ProviderError>;

    /// Forget anything cached upstream for `scope`.
    async fn revoke(&self, _scope: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Hands out one preconfigured token with a fixed lifetime.
pub struct StaticTokenProvider {
    token: Zeroizing<String>,
    ttl: Duration,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
            ttl,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch(&self, _scope: &str) -> Result<IssuedToken, ProviderError> {
        if self.token.is_empty() {
            return Err(ProviderError::Denied("no token configured".into()));
        }
        Ok(IssuedToken::new(self.token.as_str(), Utc::now() + self.ttl))
    }
}
