use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canonic_runner::ValidationRunner;
use canonic_types::{ActionContext, Fingerprint, TriggerPoint};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::credential::{AccessGrant, Credential};
use crate::error::{CredentialError, ProviderError};
use crate::provider::TokenProvider;

/// Credential gate configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Upper bound on one `acquire`, refreshes included.
    pub acquire_timeout_ms: u64,
    /// Treat a token as expired this long before its actual expiry.
    pub refresh_skew_secs: i64,
    pub max_refresh_attempts: u32,
    /// Scope requested for sending mail.
    pub scope: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
            refresh_skew_secs: 30,
            max_refresh_attempts: 3,
            scope: "Mail.Send".into(),
        }
    }
}

struct CachedToken {
    secret: Zeroizing<String>,
    expires_at: DateTime<Utc>,
}

type ScopeSlot = Arc<Mutex<Option<CachedToken>>>;

/// Validation-gated access to short-lived credentials.
pub struct CredentialGate {
    runner: ValidationRunner,
    provider: Arc<dyn TokenProvider>,
    config: CredentialConfig,
    scopes: DashMap<String, ScopeSlot>,
    grants: DashMap<u64, Fingerprint>,
    leases: DashMap<u64, String>,
    next_id: AtomicU64,
}

impl CredentialGate {
    pub fn new(
        runner: ValidationRunner,
        provider: Arc<dyn TokenProvider>,
        config: CredentialConfig,
    ) -> Self {
        Self {
            runner,
            provider,
            config,
            scopes: DashMap::new(),
            grants: DashMap::new(),
            leases: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Run `on-credential-access` validation for `context`.
    ///
    /// Returns a single-use grant when the decision permits the action.
    pub async fn authorize(&self, context: &ActionContext) -> Result<AccessGrant, CredentialError> {
        let fingerprint = context.fingerprint();
        let validation = self
            .runner
            .run(TriggerPoint::OnCredentialAccess, context)
            .await;

        if !validation.decision.permits_action() {
            let reason = validation.decision.reasons().join("; ");
            warn!(fingerprint = %fingerprint, reason = %reason, "Credential access denied");
            return Err(CredentialError::Unauthorized {
                reason,
                validation: Some(Box::new(validation)),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.grants.insert(id, fingerprint.clone());
        debug!(
            fingerprint = %fingerprint,
            grant = id,
            decision = %validation.decision.kind(),
            "Credential access granted"
        );
        Ok(AccessGrant::new(id, fingerprint, validation))
    }

    /// Exchange a grant for a credential on `scope`.
    ///
    /// The grant is consumed whether or not acquisition succeeds.
    pub async fn acquire(
        &self,
        grant: AccessGrant,
        scope: &str,
    ) -> Result<Credential, CredentialError> {
        let issued_for = self.grants.remove(&grant.id).map(|(_, fp)| fp);
        match issued_for {
            Some(fp) if &fp == grant.fingerprint() => {}
            _ => {
                warn!(scope, "Credential requested without a live grant");
                return Err(CredentialError::Unauthorized {
                    reason: "grant not issued by this gate or already used".into(),
                    validation: None,
                });
            }
        }

        let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
        let (secret, expires_at) = tokio::time::timeout(timeout, self.current_token(scope))
            .await
            .map_err(|_| CredentialError::Timeout {
                scope: scope.to_string(),
                timeout_ms: self.config.acquire_timeout_ms,
            })??;

        let lease = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.leases.insert(lease, scope.to_string());
        debug!(scope, lease, fingerprint = %grant.fingerprint(), "Credential leased");
        Ok(Credential::new(lease, scope.to_string(), secret, expires_at))
    }

    /// Return a credential. Its secret is wiped when it drops here.
    pub fn release(&self, credential: Credential) {
        self.leases.remove(&credential.lease);
        debug!(scope = credential.scope(), lease = credential.lease, "Credential released");
    }

    /// Number of leased credentials not yet released.
    pub fn outstanding(&self) -> usize {
        self.leases.len()
    }

    /// Number of grants minted but not yet consumed.
    pub fn outstanding_grants(&self) -> usize {
        self.grants.len()
    }

    /// Drop the cached token for `scope` here and at the provider.
    pub async fn revoke_scope(&self, scope: &str) -> Result<(), CredentialError> {
        if let Some((_, slot)) = self.scopes.remove(scope) {
            *slot.lock().await = None;
        }
        self.provider.revoke(scope).await?;
        info!(scope, "Credential scope revoked");
        Ok(())
    }

    fn slot(&self, scope: &str) -> ScopeSlot {
        // Clone the Arc out so no map shard lock is held across an await.
        self.scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn is_fresh(&self, expires_at: DateTime<Utc>) -> bool {
        expires_at - chrono::Duration::seconds(self.config.refresh_skew_secs) > Utc::now()
    }

    async fn current_token(
        &self,
        scope: &str,
    ) -> Result<(Zeroizing<String>, DateTime<Utc>), CredentialError> {
        let slot = self.slot(scope);
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref() {
            if self.is_fresh(token.expires_at) {
                return Ok((token.secret.clone(), token.expires_at));
            }
            debug!(scope, "Cached credential expired, refreshing");
        }

        let attempts = self.config.max_refresh_attempts.max(1);
        for attempt in 1..=attempts {
            match self.provider.fetch(scope).await {
                Ok(issued) if self.is_fresh(issued.expires_at) => {
                    let result = (issued.secret.clone(), issued.expires_at);
                    *cached = Some(CachedToken {
                        secret: issued.secret,
                        expires_at: issued.expires_at,
                    });
                    info!(scope, attempt, expires_at = %issued.expires_at, "Credential refreshed");
                    return Ok(result);
                }
                Ok(issued) => {
                    warn!(scope, attempt, expires_at = %issued.expires_at, "Provider issued an expired credential");
                }
                Err(ProviderError::Transient(reason)) => {
                    warn!(scope, attempt, reason = %reason, "Credential refresh failed");
                }
                Err(denied @ ProviderError::Denied(_)) => return Err(denied.into()),
            }
        }

        *cached = None;
        Err(CredentialError::CredentialExpired {
            scope: scope.to_string(),
            attempts,
        })
    }
}
