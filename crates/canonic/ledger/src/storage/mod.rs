//! Ledger storage backends.

mod file;
mod memory;

pub use file::FileLedgerStorage;
pub use memory::MemoryLedgerStorage;

use async_trait::async_trait;
use canonic_types::LedgerEntry;

use crate::error::StorageResult;

/// Durable home of committed ledger entries.
///
/// `append` must be atomic: after it returns `Ok` the entry is durable and
/// visible to readers; after it returns `Err` no part of it is visible.
/// Readers only ever observe a prefix of committed entries.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Persist one sealed entry. Sequences arrive strictly increasing.
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()>;

    /// Up to `limit` committed entries with sequence `>= from`, ascending.
    async fn read_from(&self, from: u64, limit: usize) -> StorageResult<Vec<LedgerEntry>>;

    /// The most recently committed entry.
    async fn last(&self) -> StorageResult<Option<LedgerEntry>>;
}
