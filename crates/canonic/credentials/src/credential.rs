use std::fmt;

use chrono::{DateTime, Utc};
use canonic_types::{AggregateResult, Fingerprint};
use zeroize::Zeroizing;

/// Proof that `on-credential-access` validation permitted an action.
///
/// Neither `Clone` nor serializable; consumed by exactly
/// one [`CredentialGate::acquire`](crate::CredentialGate::acquire).
#[derive(Debug)]
pub struct AccessGrant {
    pub(crate) id: u64,
    fingerprint: Fingerprint,
    issued_at: DateTime<Utc>,
    validation: AggregateResult,
}

impl AccessGrant {
    pub(crate) fn new(id: u64, fingerprint: Fingerprint, validation: AggregateResult) -> Self {
        Self {
            id,
            fingerprint,
            issued_at: Utc::now(),
            validation,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The `on-credential-access` run that permitted this grant, warnings
    /// included.
    pub fn validation(&self) -> &AggregateResult {
        &self.validation
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// A short-lived secret leased to one action.
///
/// Never serialized; `Debug` redacts the secret and the buffer is wiped on drop.
pub struct Credential {
    pub(crate) lease: u64,
    scope: String,
    secret: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub(crate) fn new(lease: u64, scope: String, secret: Zeroizing<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            lease,
            scope,
            secret,
            expires_at,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The bearer secret. Do not log.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scope", &self.scope)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_secret() {
        let cred = Credential::new(
            1,
            "Mail.Send".into(),
            Zeroizing::new("s3cr3t-token".into()),
            Utc::now(),
        );
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }
}
