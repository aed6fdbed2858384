//! Canned validators and a throwaway signer for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canonic_types::{ActionContext, TriggerPoint, ValidatorId, Verdict};
use ed25519_dalek::SigningKey;

use crate::bundle::ValidatorBundle;
use crate::signing::{generate_signing_key, sign_descriptor};
use crate::trust::TrustStore;
use crate::validator::{Validator, ValidatorFault};

/// Always returns the same verdict and counts invocations.
pub struct FixedValidator {
    id: String,
    verdict: Verdict,
    calls: AtomicUsize,
}

impl FixedValidator {
    pub fn new(id: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            id: id.into(),
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for FixedValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

/// Sleeps before passing; used to exercise the per-validator timeout.
pub struct SlowValidator {
    id: String,
    delay: Duration,
}

impl SlowValidator {
    pub fn new(id: impl Into<String>, delay: Duration) -> Self {
        Self {
            id: id.into(),
            delay,
        }
    }
}

#[async_trait]
impl Validator for SlowValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        tokio::time::sleep(self.delay).await;
        Ok(Verdict::Pass)
    }
}

/// Panics on every call.
pub struct PanickingValidator {
    id: String,
}

impl PanickingValidator {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Validator for PanickingValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        panic!("validator {} exploded", self.id);
    }
}

/// Returns a fault instead of a verdict.
pub struct FaultyValidator {
    id: String,
}

impl FaultyValidator {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Validator for FaultyValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        Err(ValidatorFault::Internal("backing store unavailable".into()))
    }
}

/// Ephemeral signing identity that produces registrable bundles.
pub struct TestSigner {
    key: SigningKey,
}

impl TestSigner {
    pub fn new() -> Self {
        Self {
            key: generate_signing_key(),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// Trust store containing only this signer.
    pub fn trust_store(&self) -> TrustStore {
        let mut trust = TrustStore::new();
        trust.add(self.key.verifying_key());
        trust
    }

    /// Sign a bundle whose payload names the validator id.
    pub fn bundle<V>(
        &self,
        validator: V,
        version: semver::Version,
        trigger: TriggerPoint,
        priority: u32,
    ) -> ValidatorBundle
    where
        V: Validator + 'static,
    {
        let payload = format!("{{\"id\":\"{}\"}}", validator.id());
        self.bundle_with_payload(validator, version, trigger, priority, payload.as_bytes())
    }

    pub fn bundle_with_payload<V>(
        &self,
        validator: V,
        version: semver::Version,
        trigger: TriggerPoint,
        priority: u32,
        payload: &[u8],
    ) -> ValidatorBundle
    where
        V: Validator + 'static,
    {
        self.bundle_arc(Arc::new(validator), version, trigger, priority, payload)
    }

    /// Sign a bundle around a shared validator, so tests can inspect it later.
    pub fn bundle_arc(
        &self,
        validator: Arc<dyn Validator>,
        version: semver::Version,
        trigger: TriggerPoint,
        priority: u32,
        payload: &[u8],
    ) -> ValidatorBundle {
        let descriptor = sign_descriptor(
            &self.key,
            ValidatorId::new(validator.id()),
            version,
            trigger,
            priority,
            payload,
        );
        ValidatorBundle::new(descriptor, payload.to_vec(), validator)
    }
}

impl Default for TestSigner {
    fn default() -> Self {
        Self::new()
    }
}
