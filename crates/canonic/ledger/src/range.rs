use std::collections::VecDeque;
use std::sync::Arc;

use canonic_types::LedgerEntry;
use futures::stream::{self, Stream};

use crate::error::LedgerResult;
use crate::storage::LedgerStorage;

/// A bounded, lazily paged view over committed ledger entries.
///
/// The bounds are fixed at creation, so iteration always terminates.
/// [`rewind`](Self::rewind) restarts from the beginning and yields the same
/// entries again: committed entries never change.
pub struct LedgerRange {
    storage: Arc<dyn LedgerStorage>,
    from: u64,
    to: u64,
    cursor: u64,
    page_size: usize,
    buffer: VecDeque<LedgerEntry>,
    exhausted: bool,
}

impl LedgerRange {
    pub(crate) fn new(storage: Arc<dyn LedgerStorage>, from: u64, to: u64, page_size: usize) -> Self {
        Self {
            storage,
            from,
            to,
            cursor: from,
            page_size: page_size.max(1),
            buffer: VecDeque::new(),
            exhausted: from > to,
        }
    }

    pub fn bounds(&self) -> (u64, u64) {
        (self.from, self.to)
    }

    /// Next entry, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> LedgerResult<Option<LedgerEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self.storage.read_from(self.cursor, self.page_size).await?;
            let short = page.len() < self.page_size;
            for entry in page {
                if entry.sequence > self.to {
                    self.exhausted = true;
                    break;
                }
                self.cursor = entry.sequence + 1;
                self.buffer.push_back(entry);
            }
            if short || self.cursor > self.to {
                self.exhausted = true;
            }
        }
        Ok(self.buffer.pop_front())
    }

    /// Restart from the first sequence of the range.
    pub fn rewind(&mut self) {
        self.cursor = self.from;
        self.buffer.clear();
        self.exhausted = self.from > self.to;
    }

    /// Drain the remaining entries.
    pub async fn collect_all(&mut self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    /// Consume the range as a stream of entries.
    pub fn into_stream(self) -> impl Stream<Item = LedgerResult<LedgerEntry>> {
        stream::unfold(Some(self), |state| async move {
            let Some(mut range) = state else {
                return None;
            };
            match range.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(range))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
