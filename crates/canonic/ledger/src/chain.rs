use canonic_types::{LedgerAppend, LedgerEntry};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// `previous_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// BLAKE3 over the canonical JSON of an entry's content and its chain link.
pub fn compute_entry_hash(
    draft: &LedgerAppend,
    sequence: u64,
    previous_hash: &str,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": draft.timestamp,
        "fingerprint": draft.fingerprint,
        "decision": draft.decision,
        "verdicts": draft.verdicts,
        "outcome": draft.outcome,
        "outcome_detail": draft.outcome_detail,
        "supersedes": draft.supersedes,
        "initiator": draft.initiator,
        "recipient_count": draft.recipient_count,
    });
    let serialized =
        serde_json::to_vec(&serializable).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// Whether `entry` is correctly hashed and linked to `previous_hash`.
pub fn verify_link(entry: &LedgerEntry, previous_hash: &str) -> bool {
    if entry.previous_hash != previous_hash {
        return false;
    }
    match compute_entry_hash(&entry.to_append(), entry.sequence, &entry.previous_hash) {
        Ok(hash) => hash == entry.hash,
        Err(_) => false,
    }
}

/// Outcome of walking the whole chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries_checked: u64,
    /// Sequence of the first entry whose hash or link does not verify.
    pub first_broken: Option<u64>,
    /// Hash of the last verified entry.
    pub head: String,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canonic_types::{DecisionKind, Fingerprint, Outcome};

    fn sealed(detail: &str) -> LedgerEntry {
        let draft = LedgerAppend::new(
            Fingerprint::from_hash(blake3::hash(b"action")),
            DecisionKind::Proceed,
            Outcome::Sent,
        )
        .with_detail(detail);
        let hash = compute_entry_hash(&draft, 1, GENESIS_HASH).unwrap();
        draft.seal(1, GENESIS_HASH.to_string(), hash)
    }

    #[test]
    fn sealed_entry_verifies() {
        assert!(verify_link(&sealed("ok"), GENESIS_HASH));
    }

    #[test]
    fn tampering_breaks_the_link() {
        let mut entry = sealed("ok");
        entry.outcome = Outcome::SendFailed;
        assert!(!verify_link(&entry, GENESIS_HASH));

        let entry = sealed("ok");
        assert!(!verify_link(&entry, "not-the-previous-hash"));
    }
}
