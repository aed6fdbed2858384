//! Audit ledger.
//!
//! Every attempted action ends up here as an immutable, hash-chained entry.
//!
//! - Sequence numbers are assigned by a single writer and strictly increase.
//! - Terminal appends are idempotent per action fingerprint.
//! - Corrections never edit history; they append an entry that supersedes an
//!   earlier one.
//! - Transient storage failures are retried with backoff. Records that still
//!   cannot be written are held in memory and flushed by the [`Reconciler`].
//!
//! Storage is pluggable through [`LedgerStorage`]: [`MemoryLedgerStorage`] for
//! tests and [`FileLedgerStorage`] for a framed, fsync'd segment file.

pub mod alert;
pub mod backoff;
pub mod chain;
pub mod error;
pub mod ledger;
pub mod range;
pub mod reconciler;
pub mod storage;

pub use alert::{AlertKind, AlertSink, MemoryAlertSink, OperationalAlert, TracingAlertSink};
pub use backoff::BackoffConfig;
pub use chain::{compute_entry_hash, ChainReport, GENESIS_HASH};
pub use error::{LedgerError, LedgerResult, StorageError, StorageResult};
pub use ledger::{AuditLedger, Durability, FlushReport, LedgerConfig};
pub use range::LedgerRange;
pub use reconciler::{
    ConfirmationError, DeliveryConfirmations, ReconcileReport, Reconciler, ReconcilerConfig,
};
pub use storage::{FileLedgerStorage, LedgerStorage, MemoryLedgerStorage};
