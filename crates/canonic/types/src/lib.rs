//! Core type definitions for governed mail dispatch.
//!
//! This crate provides the shared data model: plain types plus the
//! deterministic fingerprinting of action contexts.
//!
//! - [`ActionContext`]: immutable snapshot of one send attempt
//! - [`ValidatorDescriptor`]: signed, versioned metadata of a policy check
//! - [`Verdict`] / [`AggregateResult`]: what the checks said
//! - [`LedgerAppend`] / [`LedgerEntry`]: what the audit ledger records

pub mod context;
pub mod descriptor;
pub mod ids;
pub mod record;
pub mod verdict;

pub use context::{ActionContext, ActionContextBuilder, ContextError};
pub use descriptor::{TriggerPoint, ValidatorDescriptor};
pub use ids::{Fingerprint, TemplateId, ValidatorId};
pub use record::{
    DeliveryConfirmation, DeliveryReceipt, LedgerAppend, LedgerEntry, Outcome, VerdictSummary,
};
pub use verdict::{AggregateResult, AttributedVerdict, Decision, DecisionKind, Verdict, VerdictKind};
