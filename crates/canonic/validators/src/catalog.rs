use std::path::Path;
use std::sync::Arc;

use canonic_registry::{
    BundleManifest, LoadReport, RegisterOptions, RegistrationError, Validator, ValidatorBundle,
    ValidatorRegistry,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info, warn};

use crate::allowlist::{
    InitiatorAllowlist, RecipientAllowlist, TemplateSource, INITIATOR_ID, RECIPIENT_ID,
    TEMPLATE_ID,
};
use crate::audit::{self, EmailAudit};
use crate::limits::{RateLimit, RecipientLimit, RATE_ID, RECIPIENT_LIMIT_ID};

/// Every validator id this catalog can instantiate.
pub const BUILTIN_IDS: [&str; 6] = [
    audit::ID,
    RECIPIENT_ID,
    INITIATOR_ID,
    TEMPLATE_ID,
    RATE_ID,
    RECIPIENT_LIMIT_ID,
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no built-in validator named {0}")]
    UnknownValidator(String),

    #[error("invalid payload for {id}: {source}")]
    InvalidPayload {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

fn parse<T: DeserializeOwned>(id: &str, payload: &[u8]) -> Result<T, CatalogError> {
    serde_json::from_slice(payload).map_err(|source| CatalogError::InvalidPayload {
        id: id.to_string(),
        source,
    })
}

/// Instantiate the built-in validator `id` from its payload.
pub fn build_validator(id: &str, payload: &[u8]) -> Result<Arc<dyn Validator>, CatalogError> {
    let validator: Arc<dyn Validator> = match id {
        audit::ID => Arc::new(EmailAudit::new(parse(id, payload)?)),
        RECIPIENT_ID => Arc::new(RecipientAllowlist::new(parse(id, payload)?)),
        INITIATOR_ID => Arc::new(InitiatorAllowlist::new(parse(id, payload)?)),
        TEMPLATE_ID => Arc::new(TemplateSource::new(parse(id, payload)?)),
        RATE_ID => Arc::new(RateLimit::new(parse(id, payload)?)),
        RECIPIENT_LIMIT_ID => Arc::new(RecipientLimit::new(parse(id, payload)?)),
        other => return Err(CatalogError::UnknownValidator(other.to_string())),
    };
    Ok(validator)
}

/// Turn an on-disk manifest into a registrable bundle.
pub fn bundle_from_manifest(manifest: BundleManifest) -> Result<ValidatorBundle, RegistrationError> {
    let validator = build_validator(manifest.descriptor.id.as_str(), manifest.payload.as_bytes())
        .map_err(|e| RegistrationError::Malformed(e.to_string()))?;
    Ok(manifest.into_bundle(validator))
}

/// Load and register every manifest in `dir`.
///
/// Unreadable, unknown or untrusted bundles end up in the report's rejected
/// list; the rest are registered.
pub fn load_dir(
    registry: &ValidatorRegistry,
    dir: &Path,
    options: RegisterOptions,
) -> std::io::Result<LoadReport> {
    let mut bundles = Vec::new();
    let mut report = LoadReport::default();

    for (path, manifest) in BundleManifest::load_dir(dir)? {
        let id = manifest.as_ref().ok().map(|m| m.descriptor.id.clone());
        match manifest.and_then(bundle_from_manifest) {
            Ok(bundle) => bundles.push(bundle),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Skipping validator bundle");
                report.reject(id, err);
            }
        }
    }

    let registered = registry.load_bundles(bundles, options);
    report.accepted.extend(registered.accepted);
    report.rejected.extend(registered.rejected);

    info!(
        dir = %dir.display(),
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        "Validator bundles loaded"
    );
    Ok(report)
}
