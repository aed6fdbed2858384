use canonic_types::ValidatorId;
use thiserror::Error;

/// Why a bundle was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("signature invalid for {id}: {reason}")]
    SignatureInvalid { id: ValidatorId, reason: String },

    #[error("content hash mismatch for {id}: declared {declared}, actual {actual}")]
    ContentHashMismatch {
        id: ValidatorId,
        declared: String,
        actual: String,
    },

    #[error("version conflict for {id}: active {active}, attempted {attempted}")]
    VersionConflict {
        id: ValidatorId,
        active: semver::Version,
        attempted: semver::Version,
    },

    #[error("duplicate registration of {id} {version} with different content")]
    DuplicateId {
        id: ValidatorId,
        version: semver::Version,
    },

    #[error("validator reports id {reported} but descriptor names {declared}")]
    IdentityMismatch {
        declared: ValidatorId,
        reported: String,
    },

    #[error("malformed bundle: {0}")]
    Malformed(String),

    #[error("registry lock poisoned")]
    Lock,
}

impl RegistrationError {
    pub fn id(&self) -> Option<&ValidatorId> {
        match self {
            RegistrationError::SignatureInvalid { id, .. }
            | RegistrationError::ContentHashMismatch { id, .. }
            | RegistrationError::VersionConflict { id, .. }
            | RegistrationError::DuplicateId { id, .. } => Some(id),
            RegistrationError::IdentityMismatch { declared, .. } => Some(declared),
            RegistrationError::Malformed(_) | RegistrationError::Lock => None,
        }
    }
}

/// Errors building a trust store.
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("invalid key hex: {0}")]
    InvalidHex(String),

    #[error("invalid ed25519 verifying key: {0}")]
    InvalidKey(String),
}
