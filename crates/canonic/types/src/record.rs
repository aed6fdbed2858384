use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{Fingerprint, ValidatorId};
use crate::verdict::{AttributedVerdict, DecisionKind, VerdictKind};

/// Post-action outcome recorded in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Sent,
    SendFailed,
    Blocked,
    Cancelled,
    Pending,
}

impl Outcome {
    /// Terminal outcomes close an action; `Pending` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    /// Whether a later attempt at the same action may supersede this outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::SendFailed | Outcome::Blocked | Outcome::Cancelled
        )
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Sent => write!(f, "sent"),
            Outcome::SendFailed => write!(f, "send_failed"),
            Outcome::Blocked => write!(f, "blocked"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Pending => write!(f, "pending"),
        }
    }
}

/// One validator's verdict as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictSummary {
    pub validator_id: ValidatorId,
    pub version: String,
    pub verdict: VerdictKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&AttributedVerdict> for VerdictSummary {
    fn from(v: &AttributedVerdict) -> Self {
        Self {
            validator_id: v.validator_id.clone(),
            version: v.version.to_string(),
            verdict: v.verdict.kind(),
            detail: v.verdict.detail().map(str::to_string),
        }
    }
}

/// A record handed to the ledger; sequence and hashes are assigned on commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAppend {
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub decision: DecisionKind,
    pub verdicts: Vec<VerdictSummary>,
    pub outcome: Outcome,
    pub outcome_detail: Option<String>,
    pub supersedes: Option<u64>,
    pub initiator: String,
    pub recipient_count: usize,
}

impl LedgerAppend {
    pub fn new(fingerprint: Fingerprint, decision: DecisionKind, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            fingerprint,
            decision,
            verdicts: Vec::new(),
            outcome,
            outcome_detail: None,
            supersedes: None,
            initiator: String::new(),
            recipient_count: 0,
        }
    }

    pub fn with_verdicts<'a, I>(mut self, verdicts: I) -> Self
    where
        I: IntoIterator<Item = &'a AttributedVerdict>,
    {
        self.verdicts.extend(verdicts.into_iter().map(VerdictSummary::from));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.outcome_detail = Some(detail.into());
        self
    }

    pub fn superseding(mut self, sequence: u64) -> Self {
        self.supersedes = Some(sequence);
        self
    }

    pub fn initiated_by(mut self, initiator: impl Into<String>, recipient_count: usize) -> Self {
        self.initiator = initiator.into();
        self.recipient_count = recipient_count;
        self
    }

    /// Same action with a new outcome and timestamp; clears any supersede link.
    pub fn reissue(mut self, outcome: Outcome, detail: impl Into<String>) -> Self {
        self.timestamp = Utc::now();
        self.outcome = outcome;
        self.outcome_detail = Some(detail.into());
        self.supersedes = None;
        self
    }

    /// Seal the draft into an entry at `sequence`, chained to `previous_hash`.
    ///
    /// The caller computes `hash` over the sealed entry.
    pub fn seal(self, sequence: u64, previous_hash: String, hash: String) -> LedgerEntry {
        LedgerEntry {
            sequence,
            timestamp: self.timestamp,
            fingerprint: self.fingerprint,
            decision: self.decision,
            verdicts: self.verdicts,
            outcome: self.outcome,
            outcome_detail: self.outcome_detail,
            supersedes: self.supersedes,
            initiator: self.initiator,
            recipient_count: self.recipient_count,
            previous_hash,
            hash,
        }
    }
}

/// A committed, immutable ledger record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub decision: DecisionKind,
    pub verdicts: Vec<VerdictSummary>,
    pub outcome: Outcome,
    #[serde(default)]
    pub outcome_detail: Option<String>,
    #[serde(default)]
    pub supersedes: Option<u64>,
    pub initiator: String,
    pub recipient_count: usize,
    pub previous_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    /// Strip the committed fields, recovering the draft.
    pub fn to_append(&self) -> LedgerAppend {
        LedgerAppend {
            timestamp: self.timestamp,
            fingerprint: self.fingerprint.clone(),
            decision: self.decision,
            verdicts: self.verdicts.clone(),
            outcome: self.outcome,
            outcome_detail: self.outcome_detail.clone(),
            supersedes: self.supersedes,
            initiator: self.initiator.clone(),
            recipient_count: self.recipient_count,
        }
    }
}

/// Provider acknowledgement that a message was accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// A delivery the transport knows about, keyed by action fingerprint.
///
/// The reconciler compares these against the ledger after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub fingerprint: Fingerprint,
    pub receipt: DeliveryReceipt,
}
