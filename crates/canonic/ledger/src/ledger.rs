use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use canonic_types::{Fingerprint, LedgerAppend, LedgerEntry, Outcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::alert::{AlertKind, AlertSink, OperationalAlert, TracingAlertSink};
use crate::backoff::BackoffConfig;
use crate::chain::{compute_entry_hash, verify_link, ChainReport, GENESIS_HASH};
use crate::error::{LedgerError, LedgerResult};
use crate::range::LedgerRange;
use crate::storage::LedgerStorage;

/// Ledger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Retry policy for one append.
    pub backoff: BackoffConfig,
    /// Raise an operational alert once a held record has failed this many
    /// flush attempts.
    pub alert_after_attempts: u32,
    /// Entries fetched per storage read when iterating a range.
    pub page_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            alert_after_attempts: 5,
            page_size: 256,
        }
    }
}

/// Where an `append_durable` record ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "sequence", rename_all = "snake_case")]
pub enum Durability {
    Committed(u64),
    /// Held in memory until the reconciler can write it.
    Pending,
}

/// Result of one pass over held records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub committed: Vec<u64>,
    pub still_pending: usize,
}

#[derive(Clone, Copy, Debug)]
struct Effective {
    sequence: u64,
    outcome: Outcome,
}

struct Head {
    next_sequence: u64,
    last_hash: String,
}

struct HeldRecord {
    draft: LedgerAppend,
    attempts: u32,
    alerted: bool,
}

/// Append-only audit ledger over a pluggable storage backend.
pub struct AuditLedger {
    storage: Arc<dyn LedgerStorage>,
    config: LedgerConfig,
    /// Single writer: sequence assignment, chaining and the idempotency
    /// check all happen under this lock.
    head: tokio::sync::Mutex<Head>,
    effective: RwLock<HashMap<Fingerprint, Effective>>,
    held: Mutex<Vec<HeldRecord>>,
    alerts: Arc<dyn AlertSink>,
}

impl AuditLedger {
    /// Open over `storage`, rebuilding the fingerprint index from history.
    pub async fn open(storage: Arc<dyn LedgerStorage>, config: LedgerConfig) -> LedgerResult<Self> {
        Self::open_with_alerts(storage, config, Arc::new(TracingAlertSink)).await
    }

    pub async fn open_with_alerts(
        storage: Arc<dyn LedgerStorage>,
        config: LedgerConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> LedgerResult<Self> {
        let mut effective = HashMap::new();
        let mut head = Head {
            next_sequence: 1,
            last_hash: GENESIS_HASH.to_string(),
        };

        let page = config.page_size.max(1);
        let mut from = 0;
        loop {
            let batch = storage.read_from(from, page).await?;
            let Some(last) = batch.last() else { break };
            from = last.sequence + 1;
            for entry in &batch {
                effective.insert(
                    entry.fingerprint.clone(),
                    Effective {
                        sequence: entry.sequence,
                        outcome: entry.outcome,
                    },
                );
                head.next_sequence = entry.sequence + 1;
                head.last_hash = entry.hash.clone();
            }
            if batch.len() < page {
                break;
            }
        }

        info!(
            next_sequence = head.next_sequence,
            fingerprints = effective.len(),
            "Audit ledger opened"
        );

        Ok(Self {
            storage,
            config,
            head: tokio::sync::Mutex::new(head),
            effective: RwLock::new(effective),
            held: Mutex::new(Vec::new()),
            alerts,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Commit `draft`, retrying transient storage failures.
    ///
    /// A terminal draft for a fingerprint that already has an effective
    /// terminal entry, and that does not explicitly supersede it, returns the
    /// existing sequence without writing.
    pub async fn append(&self, draft: LedgerAppend) -> LedgerResult<u64> {
        self.append_with_attempts(draft, self.config.backoff.max_attempts)
            .await
    }

    /// Like [`append`](Self::append), but a draft that cannot be written
    /// after all retries is held in memory instead of returned as an error.
    ///
    /// A draft whose fingerprint already has a held record queues behind it
    /// without touching storage, so one action's entries commit in order.
    pub async fn append_durable(&self, draft: LedgerAppend) -> LedgerResult<Durability> {
        if self.is_held(&draft.fingerprint) {
            debug!(fingerprint = %draft.fingerprint, "Queueing behind held record");
            self.hold(draft);
            return Ok(Durability::Pending);
        }
        match self.append(draft.clone()).await {
            Ok(sequence) => Ok(Durability::Committed(sequence)),
            Err(err) if err.is_storage_failure() => {
                warn!(
                    fingerprint = %draft.fingerprint,
                    outcome = %draft.outcome,
                    error = %err,
                    "Ledger append deferred, holding record in memory"
                );
                self.hold(draft);
                Ok(Durability::Pending)
            }
            Err(err) => Err(err),
        }
    }

    async fn append_with_attempts(&self, mut draft: LedgerAppend, attempts: u32) -> LedgerResult<u64> {
        let mut head = self.head.lock().await;

        if let Some(existing) = self.resolve_supersede(&mut draft)? {
            debug!(
                fingerprint = %draft.fingerprint,
                sequence = existing,
                "Terminal entry already recorded"
            );
            return Ok(existing);
        }

        let sequence = head.next_sequence;
        let hash = compute_entry_hash(&draft, sequence, &head.last_hash)?;
        let entry = draft.seal(sequence, head.last_hash.clone(), hash);

        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.storage.append(&entry).await {
                Ok(()) => break,
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.config.backoff.delay_for(attempt);
                    warn!(
                        sequence,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Ledger append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(LedgerError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        head.next_sequence = sequence + 1;
        head.last_hash = entry.hash.clone();
        self.effective
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                entry.fingerprint.clone(),
                Effective {
                    sequence,
                    outcome: entry.outcome,
                },
            );

        info!(
            sequence,
            fingerprint = %entry.fingerprint,
            outcome = %entry.outcome,
            supersedes = ?entry.supersedes,
            "Ledger entry appended"
        );
        Ok(sequence)
    }

    /// Apply supersede rules to `draft`. Returns `Some(existing)` when the
    /// append is an idempotent repeat.
    fn resolve_supersede(&self, draft: &mut LedgerAppend) -> LedgerResult<Option<u64>> {
        let current = self
            .effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&draft.fingerprint)
            .copied();

        match (current, draft.supersedes) {
            (None, None) => Ok(None),
            (None, Some(sequence)) => Err(LedgerError::InvalidSupersede {
                fingerprint: draft.fingerprint.clone(),
                sequence,
                reason: "no prior entry for this fingerprint".into(),
            }),
            (Some(existing), None) if existing.outcome == Outcome::Pending => {
                draft.supersedes = Some(existing.sequence);
                Ok(None)
            }
            (Some(existing), None) if draft.outcome.is_terminal() => Ok(Some(existing.sequence)),
            (Some(existing), None) => Err(LedgerError::Conflict {
                fingerprint: draft.fingerprint.clone(),
                existing: existing.sequence,
            }),
            (Some(existing), Some(sequence)) if sequence != existing.sequence => {
                Err(LedgerError::InvalidSupersede {
                    fingerprint: draft.fingerprint.clone(),
                    sequence,
                    reason: format!("effective entry is {}", existing.sequence),
                })
            }
            (Some(existing), Some(sequence)) if existing.outcome == Outcome::Sent => {
                Err(LedgerError::InvalidSupersede {
                    fingerprint: draft.fingerprint.clone(),
                    sequence,
                    reason: "a sent entry is final".into(),
                })
            }
            (Some(_), Some(_)) => Ok(None),
        }
    }

    fn is_held(&self, fingerprint: &Fingerprint) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| &h.draft.fingerprint == fingerprint)
    }

    fn hold(&self, draft: LedgerAppend) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.push(HeldRecord {
            draft,
            attempts: 0,
            alerted: false,
        });
    }

    /// Drafts waiting to be written.
    pub fn pending(&self) -> Vec<LedgerAppend> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.draft.clone())
            .collect()
    }

    /// Try once more to commit every held record, in arrival order.
    pub async fn flush_pending(&self) -> FlushReport {
        let batch: Vec<HeldRecord> = {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *held)
        };

        let mut report = FlushReport::default();
        let mut remaining = Vec::new();
        for mut record in batch {
            match self.append_with_attempts(record.draft.clone(), 1).await {
                Ok(sequence) => report.committed.push(sequence),
                Err(err) => {
                    record.attempts += 1;
                    if !err.is_storage_failure() {
                        warn!(
                            fingerprint = %record.draft.fingerprint,
                            error = %err,
                            "Held ledger record rejected"
                        );
                    }
                    if record.attempts >= self.config.alert_after_attempts && !record.alerted {
                        record.alerted = true;
                        self.alerts.raise(OperationalAlert {
                            kind: AlertKind::PendingRetriesExceeded,
                            raised_at: Utc::now(),
                            fingerprint: Some(record.draft.fingerprint.clone()),
                            attempts: record.attempts,
                            message: format!(
                                "ledger record for {} still not durable after {} attempts: {}",
                                record.draft.fingerprint, record.attempts, err
                            ),
                        });
                    }
                    remaining.push(record);
                }
            }
        }

        report.still_pending = remaining.len();
        if !remaining.is_empty() {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            // Anything held while we were flushing goes after the older records.
            remaining.append(&mut held);
            *held = remaining;
        }
        report
    }

    /// Effective (latest, non-superseded) committed entry for `fingerprint`.
    pub async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> LedgerResult<Option<LedgerEntry>> {
        let sequence = self
            .effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .map(|e| e.sequence);

        match sequence {
            Some(sequence) => Ok(self
                .storage
                .read_from(sequence, 1)
                .await?
                .into_iter()
                .next()
                .filter(|e| e.sequence == sequence)),
            None => Ok(None),
        }
    }

    /// Effective entries whose outcome is still `Pending`.
    pub async fn effective_pending(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut sequences: Vec<u64> = self
            .effective
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.outcome == Outcome::Pending)
            .map(|e| e.sequence)
            .collect();
        sequences.sort_unstable();

        let mut entries = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(entry) = self.storage.read_from(sequence, 1).await?.into_iter().next() {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Sequence of the last committed entry (0 when empty).
    pub async fn last_sequence(&self) -> u64 {
        self.head.lock().await.next_sequence - 1
    }

    /// Lazy, finite, restartable view of committed entries in `[from, to]`.
    ///
    /// The upper bound is clamped to the last sequence committed when the
    /// range is created, so later appends never extend an existing range.
    pub async fn read_range(&self, from: u64, to: u64) -> LedgerResult<LedgerRange> {
        if from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let end = to.min(self.last_sequence().await);
        Ok(LedgerRange::new(
            Arc::clone(&self.storage),
            from,
            end,
            self.config.page_size,
        ))
    }

    /// Recompute every hash and link from genesis.
    pub async fn verify_chain(&self) -> LedgerResult<ChainReport> {
        let mut range = self.read_range(0, u64::MAX).await?;
        let mut previous = GENESIS_HASH.to_string();
        let mut checked = 0;

        while let Some(entry) = range.next().await? {
            if !verify_link(&entry, &previous) {
                let report = ChainReport {
                    entries_checked: checked,
                    first_broken: Some(entry.sequence),
                    head: previous,
                };
                self.alerts.raise(OperationalAlert {
                    kind: AlertKind::ChainBroken,
                    raised_at: Utc::now(),
                    fingerprint: Some(entry.fingerprint.clone()),
                    attempts: 0,
                    message: format!("ledger hash chain broken at sequence {}", entry.sequence),
                });
                return Ok(report);
            }
            previous = entry.hash;
            checked += 1;
        }

        Ok(ChainReport {
            entries_checked: checked,
            first_broken: None,
            head: previous,
        })
    }
}

