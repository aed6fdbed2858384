use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use canonic_types::{TriggerPoint, ValidatorDescriptor, ValidatorId};
use tracing::{debug, info, warn};

use crate::bundle::ValidatorBundle;
use crate::error::RegistrationError;
use crate::signing::{content_hash, verify_signature};
use crate::trust::TrustStore;
use crate::validator::Validator;

/// Options for [`ValidatorRegistry::register`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterOptions {
    /// Permit replacing an active version with a lower one.
    pub allow_downgrade: bool,
}

/// What a successful registration did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// First version of this id.
    Registered,
    Upgraded { previous: semver::Version },
    Downgraded { previous: semver::Version },
    /// Identical bundle was already active.
    Unchanged,
}

/// A validator as handed to the runner: metadata plus capability.
#[derive(Clone)]
pub struct ResolvedValidator {
    pub descriptor: ValidatorDescriptor,
    pub validator: Arc<dyn Validator>,
}

impl std::fmt::Debug for ResolvedValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedValidator")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Summary of a batch load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: Vec<(ValidatorId, RegistrationOutcome)>,
    pub rejected: Vec<(Option<ValidatorId>, RegistrationError)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Record a bundle that never reached registration (e.g. unparseable).
    pub fn reject(&mut self, id: Option<ValidatorId>, err: RegistrationError) {
        self.rejected.push((id, err));
    }
}

#[derive(Default)]
struct RegistryState {
    active: BTreeMap<ValidatorId, ResolvedValidator>,
    history: BTreeMap<ValidatorId, Vec<ValidatorDescriptor>>,
}

/// Version-locked table of trusted validators.
pub struct ValidatorRegistry {
    trust: TrustStore,
    state: RwLock<RegistryState>,
}

impl ValidatorRegistry {
    pub fn new(trust: TrustStore) -> Self {
        Self {
            trust,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// Verify and admit a bundle.
    pub fn register(
        &self,
        bundle: ValidatorBundle,
        options: RegisterOptions,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let descriptor = &bundle.descriptor;

        verify_signature(descriptor, &self.trust)?;

        let actual = content_hash(&bundle.payload);
        if actual != descriptor.content_hash {
            return Err(RegistrationError::ContentHashMismatch {
                id: descriptor.id.clone(),
                declared: descriptor.content_hash.clone(),
                actual,
            });
        }

        if bundle.validator.id() != descriptor.id.as_str() {
            return Err(RegistrationError::IdentityMismatch {
                declared: descriptor.id.clone(),
                reported: bundle.validator.id().to_string(),
            });
        }

        let mut state = self.state.write().map_err(|_| RegistrationError::Lock)?;

        let same_version = state
            .history
            .get(&descriptor.id)
            .and_then(|h| h.iter().find(|d| d.version == descriptor.version));
        if let Some(prior) = same_version {
            if prior.content_hash != descriptor.content_hash {
                return Err(RegistrationError::DuplicateId {
                    id: descriptor.id.clone(),
                    version: descriptor.version.clone(),
                });
            }
        }

        let outcome = match state.active.get(&descriptor.id) {
            None => RegistrationOutcome::Registered,
            // Same content at the same version: the registered descriptor
            // stays, including its trigger and priority.
            Some(active)
                if active.descriptor.version == descriptor.version
                    && active.descriptor.content_hash == descriptor.content_hash =>
            {
                debug!(
                    validator = %descriptor.id,
                    version = %descriptor.version,
                    metadata_changed = active.descriptor != *descriptor,
                    "Re-registration unchanged"
                );
                return Ok(RegistrationOutcome::Unchanged);
            }
            Some(active) if active.descriptor.version == descriptor.version => {
                return Err(RegistrationError::DuplicateId {
                    id: descriptor.id.clone(),
                    version: descriptor.version.clone(),
                });
            }
            Some(active) if active.descriptor.version > descriptor.version => {
                if !options.allow_downgrade {
                    return Err(RegistrationError::VersionConflict {
                        id: descriptor.id.clone(),
                        active: active.descriptor.version.clone(),
                        attempted: descriptor.version.clone(),
                    });
                }
                RegistrationOutcome::Downgraded {
                    previous: active.descriptor.version.clone(),
                }
            }
            Some(active) => RegistrationOutcome::Upgraded {
                previous: active.descriptor.version.clone(),
            },
        };

        info!(
            validator = %descriptor.id,
            version = %descriptor.version,
            trigger = %descriptor.trigger,
            priority = descriptor.priority,
            outcome = ?outcome,
            "Validator registered"
        );

        let id = descriptor.id.clone();
        let history = state.history.entry(id.clone()).or_default();
        if !history.iter().any(|d| d == &bundle.descriptor) {
            history.push(bundle.descriptor.clone());
        }
        state.active.insert(
            id,
            ResolvedValidator {
                descriptor: bundle.descriptor,
                validator: bundle.validator,
            },
        );

        Ok(outcome)
    }

    /// Register a batch. Rejected bundles are reported; the previously
    /// trusted set stays in force for their ids.
    pub fn load_bundles<I>(&self, bundles: I, options: RegisterOptions) -> LoadReport
    where
        I: IntoIterator<Item = ValidatorBundle>,
    {
        let mut report = LoadReport::default();
        for bundle in bundles {
            let id = bundle.descriptor.id.clone();
            match self.register(bundle, options) {
                Ok(outcome) => report.accepted.push((id, outcome)),
                Err(err) => {
                    warn!(validator = %id, error = %err, "Validator bundle rejected");
                    report.rejected.push((Some(id), err));
                }
            }
        }
        report
    }

    /// Active validators at `trigger`, by priority then id.
    pub fn resolve_order(&self, trigger: TriggerPoint) -> Vec<ResolvedValidator> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut resolved: Vec<ResolvedValidator> = state
            .active
            .values()
            .filter(|v| v.descriptor.trigger == trigger)
            .cloned()
            .collect();
        resolved.sort_by(|a, b| {
            a.descriptor
                .priority
                .cmp(&b.descriptor.priority)
                .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
        });
        resolved
    }

    /// Signature check of a descriptor against this registry's trust store.
    pub fn verify(&self, descriptor: &ValidatorDescriptor) -> bool {
        verify_signature(descriptor, &self.trust).is_ok()
    }

    /// Metadata of every active validator, grouped by trigger in run order.
    pub fn descriptors(&self) -> Vec<ValidatorDescriptor> {
        let mut all: Vec<ValidatorDescriptor> = TriggerPoint::ALL
            .into_iter()
            .flat_map(|t| self.resolve_order(t))
            .map(|r| r.descriptor)
            .collect();
        all.dedup();
        all
    }

    /// Every descriptor ever admitted for `id`, in admission order.
    pub fn history(&self, id: &ValidatorId) -> Vec<ValidatorDescriptor> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.history.get(id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{FixedValidator, TestSigner};
    use canonic_types::Verdict;
    use semver::Version;

    fn registry(signer: &TestSigner) -> ValidatorRegistry {
        ValidatorRegistry::new(signer.trust_store())
    }

    #[test]
    fn resolves_by_priority_then_id() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        for (id, priority) in [("b.check", 20), ("a.check", 20), ("z.check", 5)] {
            let bundle = signer.bundle(
                FixedValidator::new(id, Verdict::Pass),
                Version::new(1, 0, 0),
                TriggerPoint::PreAction,
                priority,
            );
            reg.register(bundle, RegisterOptions::default()).unwrap();
        }

        let order: Vec<String> = reg
            .resolve_order(TriggerPoint::PreAction)
            .into_iter()
            .map(|r| r.descriptor.id.0)
            .collect();
        assert_eq!(order, vec!["z.check", "a.check", "b.check"]);
        assert!(reg.resolve_order(TriggerPoint::OnResourceLoad).is_empty());
    }

    #[test]
    fn bad_signature_is_rejected_and_not_resolvable() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let mut bundle = signer.bundle(
            FixedValidator::new("recipient.allowlist", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        bundle.descriptor.priority = 1;

        let err = reg.register(bundle, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::SignatureInvalid { .. }));
        assert!(reg.resolve_order(TriggerPoint::PreAction).is_empty());
    }

    #[test]
    fn unknown_signer_is_rejected() {
        let signer = TestSigner::new();
        let stranger = TestSigner::new();
        let reg = registry(&signer);
        let bundle = stranger.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        let err = reg.register(bundle, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::SignatureInvalid { .. }));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let mut bundle = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        bundle.payload = b"{\"tampered\":true}".to_vec();
        let err = reg.register(bundle, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::ContentHashMismatch { .. }));
    }

    #[test]
    fn downgrade_requires_permission() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let v2 = signer.bundle(
            FixedValidator::new("rate.limit", Verdict::Pass),
            Version::new(2, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        let v1 = signer.bundle(
            FixedValidator::new("rate.limit", Verdict::Pass),
            Version::new(1, 4, 0),
            TriggerPoint::PreAction,
            10,
        );
        reg.register(v2, RegisterOptions::default()).unwrap();

        let err = reg
            .register(v1.clone(), RegisterOptions::default())
            .unwrap_err();
        assert!(matches!(err, RegistrationError::VersionConflict { .. }));
        assert_eq!(
            reg.resolve_order(TriggerPoint::PreAction)[0].descriptor.version,
            semver::Version::new(2, 0, 0)
        );

        let outcome = reg
            .register(v1, RegisterOptions { allow_downgrade: true })
            .unwrap();
        assert_eq!(
            outcome,
            RegistrationOutcome::Downgraded {
                previous: semver::Version::new(2, 0, 0)
            }
        );
        assert_eq!(reg.history(&ValidatorId::new("rate.limit")).len(), 2);
    }

    #[test]
    fn same_version_same_content_is_unchanged() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let bundle = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        assert_eq!(
            reg.register(bundle.clone(), RegisterOptions::default()).unwrap(),
            RegistrationOutcome::Registered
        );
        assert_eq!(
            reg.register(bundle, RegisterOptions::default()).unwrap(),
            RegistrationOutcome::Unchanged
        );
        assert_eq!(reg.history(&ValidatorId::new("email.audit")).len(), 1);
    }

    #[test]
    fn same_content_with_new_metadata_keeps_registered_descriptor() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let first = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        let reprioritized = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            99,
        );
        reg.register(first, RegisterOptions::default()).unwrap();
        assert_eq!(
            reg.register(reprioritized, RegisterOptions::default()).unwrap(),
            RegistrationOutcome::Unchanged
        );

        let order = reg.resolve_order(TriggerPoint::PreAction);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].descriptor.priority, 10);
        assert_eq!(reg.history(&ValidatorId::new("email.audit")).len(), 1);
    }

    #[test]
    fn same_version_different_content_is_duplicate() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let first = signer.bundle_with_payload(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
            b"{\"a\":1}",
        );
        let second = signer.bundle_with_payload(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
            b"{\"a\":2}",
        );
        reg.register(first, RegisterOptions::default()).unwrap();
        let err = reg.register(second, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateId { .. }));
    }

    #[test]
    fn capability_identity_must_match_descriptor() {
        let signer = TestSigner::new();
        let reg = registry(&signer);
        let mut bundle = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        bundle.validator = Arc::new(FixedValidator::new("something.else", Verdict::Pass));
        let err = reg.register(bundle, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::IdentityMismatch { .. }));
    }

    #[test]
    fn load_bundles_keeps_trusted_set_on_rejection() {
        let signer = TestSigner::new();
        let stranger = TestSigner::new();
        let reg = registry(&signer);
        let good = signer.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(1, 0, 0),
            TriggerPoint::PreAction,
            10,
        );
        let evil_upgrade = stranger.bundle(
            FixedValidator::new("email.audit", Verdict::Pass),
            Version::new(9, 0, 0),
            TriggerPoint::PreAction,
            10,
        );

        let report = reg.load_bundles([good, evil_upgrade], RegisterOptions::default());
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert!(!report.is_clean());

        let active = reg.resolve_order(TriggerPoint::PreAction);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].descriptor.version, semver::Version::new(1, 0, 0));
        assert!(reg.verify(&active[0].descriptor));
    }
}
