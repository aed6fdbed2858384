use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use canonic_types::LedgerEntry;

use super::LedgerStorage;
use crate::error::{StorageError, StorageResult};

/// In-process backend. Deterministic and test-friendly; nothing survives the
/// process.
///
/// Transient failures can be injected to exercise retry paths.
#[derive(Default)]
pub struct MemoryLedgerStorage {
    entries: RwLock<Vec<LedgerEntry>>,
    failures_remaining: AtomicU32,
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` appends fail with [`StorageError::Unavailable`].
    pub fn fail_next_appends(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStorage for MemoryLedgerStorage {
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected failure".into()));
        }

        let mut guard = self
            .entries
            .write()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        if let Some(last) = guard.last() {
            if entry.sequence <= last.sequence {
                return Err(StorageError::Corrupt(format!(
                    "sequence {} does not follow {}",
                    entry.sequence, last.sequence
                )));
            }
        }
        guard.push(entry.clone());
        Ok(())
    }

    async fn read_from(&self, from: u64, limit: usize) -> StorageResult<Vec<LedgerEntry>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        let start = guard.partition_point(|e| e.sequence < from);
        Ok(guard[start..].iter().take(limit).cloned().collect())
    }

    async fn last(&self) -> StorageResult<Option<LedgerEntry>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))?;
        Ok(guard.last().cloned())
    }
}
