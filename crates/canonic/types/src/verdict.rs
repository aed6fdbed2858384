use serde::{Deserialize, Serialize};

use crate::descriptor::TriggerPoint;
use crate::ids::ValidatorId;

/// What a single validator concluded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail { reason: String },
    Warn { message: String },
}

impl Verdict {
    pub fn fail(reason: impl Into<String>) -> Self {
        Verdict::Fail {
            reason: reason.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Verdict::Warn {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> VerdictKind {
        match self {
            Verdict::Pass => VerdictKind::Pass,
            Verdict::Fail { .. } => VerdictKind::Fail,
            Verdict::Warn { .. } => VerdictKind::Warn,
        }
    }

    /// The reason or message carried by the verdict, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail { reason } => Some(reason),
            Verdict::Warn { message } => Some(message),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Pass,
    Fail,
    Warn,
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictKind::Pass => write!(f, "pass"),
            VerdictKind::Fail => write!(f, "fail"),
            VerdictKind::Warn => write!(f, "warn"),
        }
    }
}

/// A verdict together with the validator identity that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributedVerdict {
    pub validator_id: ValidatorId,
    pub version: semver::Version,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Aggregate decision derived from a set of verdicts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "details", rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    ProceedWithWarnings(Vec<String>),
    Blocked(Vec<String>),
}

impl Decision {
    /// Reduce verdicts to a decision.
    ///
    /// Any fail blocks; otherwise any warn yields warnings; otherwise proceed.
    /// Reasons keep the order in which verdicts are given, but the kind of the
    /// decision does not depend on that order.
    pub fn from_verdicts<'a, I>(verdicts: I) -> Self
    where
        I: IntoIterator<Item = &'a Verdict>,
    {
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        for verdict in verdicts {
            match verdict {
                Verdict::Pass => {}
                Verdict::Fail { reason } => failures.push(reason.clone()),
                Verdict::Warn { message } => warnings.push(message.clone()),
            }
        }

        if !failures.is_empty() {
            Decision::Blocked(failures)
        } else if !warnings.is_empty() {
            Decision::ProceedWithWarnings(warnings)
        } else {
            Decision::Proceed
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Proceed => DecisionKind::Proceed,
            Decision::ProceedWithWarnings(_) => DecisionKind::ProceedWithWarnings,
            Decision::Blocked(_) => DecisionKind::Blocked,
        }
    }

    /// Whether the guarded action may go ahead.
    pub fn permits_action(&self) -> bool {
        !matches!(self, Decision::Blocked(_))
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Decision::Proceed => &[],
            Decision::ProceedWithWarnings(msgs) | Decision::Blocked(msgs) => msgs,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Proceed,
    ProceedWithWarnings,
    Blocked,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Proceed => write!(f, "proceed"),
            DecisionKind::ProceedWithWarnings => write!(f, "proceed_with_warnings"),
            DecisionKind::Blocked => write!(f, "blocked"),
        }
    }
}

/// Result of running every validator registered at one trigger point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub trigger: TriggerPoint,
    /// Verdicts in resolution order.
    pub verdicts: Vec<AttributedVerdict>,
    pub decision: Decision,
}

impl AggregateResult {
    pub fn new(trigger: TriggerPoint, verdicts: Vec<AttributedVerdict>) -> Self {
        let decision = Decision::from_verdicts(verdicts.iter().map(|v| &v.verdict));
        Self {
            trigger,
            verdicts,
            decision,
        }
    }

    /// Result for a trigger point with no registered validators.
    pub fn empty(trigger: TriggerPoint) -> Self {
        Self::new(trigger, Vec::new())
    }
}
