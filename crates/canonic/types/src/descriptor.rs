use serde::{Deserialize, Serialize};

use crate::ids::ValidatorId;

/// Where in an action's lifecycle a validator is consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerPoint {
    /// Before the transport is invoked.
    PreAction,
    /// Before the credential gate hands out a grant.
    OnCredentialAccess,
    /// Before a template is loaded into the context.
    OnResourceLoad,
}

impl TriggerPoint {
    pub const ALL: [TriggerPoint; 3] = [
        TriggerPoint::PreAction,
        TriggerPoint::OnCredentialAccess,
        TriggerPoint::OnResourceLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPoint::PreAction => "pre-action",
            TriggerPoint::OnCredentialAccess => "on-credential-access",
            TriggerPoint::OnResourceLoad => "on-resource-load",
        }
    }
}

impl std::fmt::Display for TriggerPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerPoint::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown trigger point: {s}"))
    }
}

/// Signed, versioned metadata describing one validator.
///
/// The registry trusts nothing here until the signature verifies against a
/// key in its trust store. Once registered a descriptor is never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDescriptor {
    pub id: ValidatorId,
    pub version: semver::Version,
    /// BLAKE3 hex digest of the validator payload.
    pub content_hash: String,
    /// Ed25519 signature (hex) over the signing message.
    pub signature: String,
    /// Verifying key (hex) of the signer.
    pub signer: String,
    pub trigger: TriggerPoint,
    /// Ordering key; lower runs first.
    pub priority: u32,
}

impl ValidatorDescriptor {
    /// Canonical bytes covered by the signature.
    ///
    /// Everything except the signature itself is bound, so reordering a
    /// validator or moving it to another trigger point invalidates it.
    pub fn signing_message(&self) -> Vec<u8> {
        signing_message(
            &self.id,
            &self.version,
            &self.content_hash,
            &self.signer,
            self.trigger,
            self.priority,
        )
    }
}

/// Signing message for descriptor fields, usable before a signature exists.
pub fn signing_message(
    id: &ValidatorId,
    version: &semver::Version,
    content_hash: &str,
    signer: &str,
    trigger: TriggerPoint,
    priority: u32,
) -> Vec<u8> {
    format!(
        "canonic-validator/v1\nid={}\nversion={}\ncontent={}\nsigner={}\ntrigger={}\npriority={}",
        id, version, content_hash, signer, trigger, priority
    )
    .into_bytes()
}
