//! Behavioral tests for the audit ledger and reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use canonic_ledger::{
    AlertKind, AuditLedger, BackoffConfig, ConfirmationError, DeliveryConfirmations, Durability,
    FileLedgerStorage, LedgerConfig, LedgerError, LedgerStorage, MemoryAlertSink,
    MemoryLedgerStorage, Reconciler, ReconcilerConfig, StorageError, StorageResult,
};
use canonic_types::{
    DecisionKind, DeliveryConfirmation, DeliveryReceipt, Fingerprint, LedgerAppend, LedgerEntry,
    Outcome,
};
use chrono::Utc;
use futures::StreamExt;

fn fp(tag: &str) -> Fingerprint {
    Fingerprint::from_hash(blake3::hash(tag.as_bytes()))
}

fn draft(tag: &str, outcome: Outcome) -> LedgerAppend {
    LedgerAppend::new(fp(tag), DecisionKind::Proceed, outcome).initiated_by("user:dex", 1)
}

fn config() -> LedgerConfig {
    LedgerConfig {
        backoff: BackoffConfig::immediate(3),
        alert_after_attempts: 2,
        page_size: 2,
    }
}

async fn memory_ledger() -> (Arc<MemoryLedgerStorage>, Arc<MemoryAlertSink>, AuditLedger) {
    let storage = Arc::new(MemoryLedgerStorage::new());
    let alerts = Arc::new(MemoryAlertSink::new());
    let ledger = AuditLedger::open_with_alerts(storage.clone(), config(), alerts.clone())
        .await
        .unwrap();
    (storage, alerts, ledger)
}

#[tokio::test]
async fn concurrent_appends_get_unique_increasing_sequences() {
    let (_, _, ledger) = memory_ledger().await;
    let ledger = Arc::new(ledger);

    let mut handles = Vec::new();
    for i in 0..32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.append(draft(&format!("a{i}"), Outcome::Sent)).await.unwrap()
        }));
    }
    let mut sequences = Vec::new();
    for h in handles {
        sequences.push(h.await.unwrap());
    }
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=32).collect::<Vec<u64>>());

    let entries = ledger.read_range(1, 32).await.unwrap().collect_all().await.unwrap();
    assert!(entries.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(ledger.verify_chain().await.unwrap().is_intact());
}

#[tokio::test]
async fn terminal_append_is_idempotent_by_fingerprint() {
    let (storage, _, ledger) = memory_ledger().await;
    let first = ledger.append(draft("x", Outcome::Sent)).await.unwrap();
    let again = ledger.append(draft("x", Outcome::Sent)).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(storage.len(), 1);
}

#[tokio::test]
async fn pending_is_superseded_implicitly_and_sent_is_final() {
    let (_, _, ledger) = memory_ledger().await;
    let intent = ledger.append(draft("x", Outcome::Pending)).await.unwrap();
    let sent = ledger.append(draft("x", Outcome::Sent)).await.unwrap();

    let effective = ledger.find_by_fingerprint(&fp("x")).await.unwrap().unwrap();
    assert_eq!(effective.sequence, sent);
    assert_eq!(effective.supersedes, Some(intent));

    let err = ledger
        .append(draft("x", Outcome::SendFailed).superseding(sent))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSupersede { .. }));
}

#[tokio::test]
async fn retryable_outcome_can_be_superseded_explicitly() {
    let (_, _, ledger) = memory_ledger().await;
    let blocked = ledger.append(draft("x", Outcome::Blocked)).await.unwrap();

    let err = ledger.append(draft("x", Outcome::Pending)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Conflict { existing, .. } if existing == blocked));

    let stale = ledger
        .append(draft("x", Outcome::Pending).superseding(blocked + 7))
        .await
        .unwrap_err();
    assert!(matches!(stale, LedgerError::InvalidSupersede { .. }));

    let retry = ledger
        .append(draft("x", Outcome::Pending).superseding(blocked))
        .await
        .unwrap();
    let sent = ledger.append(draft("x", Outcome::Sent)).await.unwrap();
    let effective = ledger.find_by_fingerprint(&fp("x")).await.unwrap().unwrap();
    assert_eq!(effective.sequence, sent);
    assert_eq!(effective.supersedes, Some(retry));

    // History keeps every entry.
    let all = ledger.read_range(1, 10).await.unwrap().collect_all().await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn supersede_without_history_is_rejected() {
    let (_, _, ledger) = memory_ledger().await;
    let err = ledger
        .append(draft("ghost", Outcome::Sent).superseding(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSupersede { .. }));
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (storage, _, ledger) = memory_ledger().await;
    storage.fail_next_appends(2);
    let seq = ledger.append(draft("x", Outcome::Sent)).await.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(storage.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_plain_append_without_gaps() {
    let (storage, _, ledger) = memory_ledger().await;
    storage.fail_next_appends(3);
    let err = ledger.append(draft("x", Outcome::Sent)).await.unwrap_err();
    assert!(matches!(err, LedgerError::RetriesExhausted { attempts: 3, .. }));

    // The failed attempt did not consume a sequence number.
    assert_eq!(ledger.append(draft("y", Outcome::Sent)).await.unwrap(), 1);
}

#[tokio::test]
async fn durable_append_holds_then_flushes_and_alerts() {
    let (storage, alerts, ledger) = memory_ledger().await;
    storage.fail_next_appends(3 + 2);

    let durability = ledger.append_durable(draft("x", Outcome::Sent)).await.unwrap();
    assert_eq!(durability, Durability::Pending);
    assert_eq!(ledger.pending().len(), 1);
    assert!(ledger.find_by_fingerprint(&fp("x")).await.unwrap().is_none());

    // Two more failed flushes reach the alert threshold exactly once.
    assert_eq!(ledger.flush_pending().await.still_pending, 1);
    assert_eq!(ledger.flush_pending().await.still_pending, 1);
    let raised = alerts.alerts();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlertKind::PendingRetriesExceeded);

    // Storage recovers; the record lands and is not dropped.
    let report = ledger.flush_pending().await;
    assert_eq!(report.committed, vec![1]);
    assert!(ledger.pending().is_empty());
    assert_eq!(alerts.alerts().len(), 1);
    assert_eq!(
        ledger.find_by_fingerprint(&fp("x")).await.unwrap().unwrap().outcome,
        Outcome::Sent
    );
}

#[tokio::test]
async fn read_range_is_finite_restartable_and_stable() {
    let (_, _, ledger) = memory_ledger().await;
    for i in 0..5 {
        ledger.append(draft(&format!("r{i}"), Outcome::Sent)).await.unwrap();
    }

    let mut range = ledger.read_range(2, 100).await.unwrap();
    assert_eq!(range.bounds(), (2, 5));

    // Entries appended after creation do not extend the range.
    ledger.append(draft("late", Outcome::Sent)).await.unwrap();

    let first = range.collect_all().await.unwrap();
    assert_eq!(first.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    assert!(range.next().await.unwrap().is_none());

    range.rewind();
    let second = range.collect_all().await.unwrap();
    assert_eq!(first, second);

    let streamed: Vec<LedgerEntry> = ledger
        .read_range(1, 3)
        .await
        .unwrap()
        .into_stream()
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(streamed.len(), 3);

    assert!(matches!(
        ledger.read_range(5, 1).await,
        Err(LedgerError::InvalidRange { .. })
    ));
}

/// Serves entries from an inner store, rewriting one on the way out.
struct TamperingStorage {
    inner: MemoryLedgerStorage,
    tamper: u64,
}

#[async_trait]
impl LedgerStorage for TamperingStorage {
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()> {
        self.inner.append(entry).await
    }

    async fn read_from(&self, from: u64, limit: usize) -> StorageResult<Vec<LedgerEntry>> {
        let mut entries = self.inner.read_from(from, limit).await?;
        for e in &mut entries {
            if e.sequence == self.tamper {
                e.outcome_detail = Some("edited after the fact".into());
            }
        }
        Ok(entries)
    }

    async fn last(&self) -> StorageResult<Option<LedgerEntry>> {
        self.inner.last().await
    }
}

#[tokio::test]
async fn verify_chain_finds_first_broken_link() {
    let storage = Arc::new(TamperingStorage {
        inner: MemoryLedgerStorage::new(),
        tamper: 3,
    });
    let alerts = Arc::new(MemoryAlertSink::new());
    let ledger = AuditLedger::open_with_alerts(storage, config(), alerts.clone())
        .await
        .unwrap();
    for i in 0..4 {
        ledger.append(draft(&format!("c{i}"), Outcome::Sent)).await.unwrap();
    }

    let report = ledger.verify_chain().await.unwrap();
    assert_eq!(report.first_broken, Some(3));
    assert_eq!(report.entries_checked, 2);
    assert_eq!(alerts.alerts()[0].kind, AlertKind::ChainBroken);
}

#[tokio::test]
async fn reopened_file_ledger_continues_chain_and_index() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = Arc::new(FileLedgerStorage::open(dir.path()).unwrap());
        let ledger = AuditLedger::open(storage, config()).await.unwrap();
        ledger.append(draft("a", Outcome::Blocked)).await.unwrap();
        ledger.append(draft("b", Outcome::Sent)).await.unwrap();
    }

    let storage = Arc::new(FileLedgerStorage::open(dir.path()).unwrap());
    let ledger = AuditLedger::open(storage, config()).await.unwrap();
    assert_eq!(ledger.last_sequence().await, 2);
    // Idempotency survives the restart.
    assert_eq!(ledger.append(draft("b", Outcome::Sent)).await.unwrap(), 2);
    assert_eq!(ledger.append(draft("c", Outcome::Sent)).await.unwrap(), 3);
    assert!(ledger.verify_chain().await.unwrap().is_intact());
}

#[tokio::test]
async fn one_writer_per_ledger_directory() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileLedgerStorage::open(dir.path()).unwrap());
    let ledger = AuditLedger::open(storage, config()).await.unwrap();
    assert_eq!(ledger.append(draft("a", Outcome::Sent)).await.unwrap(), 1);

    // A second process would otherwise reuse sequence 1 and overwrite it.
    assert!(matches!(
        FileLedgerStorage::open(dir.path()),
        Err(StorageError::Unavailable(_))
    ));
    drop(ledger);

    let storage = Arc::new(FileLedgerStorage::open(dir.path()).unwrap());
    let ledger = AuditLedger::open(storage, config()).await.unwrap();
    assert_eq!(ledger.append(draft("b", Outcome::Sent)).await.unwrap(), 2);
    let entries = ledger.read_range(1, 10).await.unwrap().collect_all().await.unwrap();
    assert_eq!(entries.len(), 2);
}

struct FixedConfirmations(Vec<DeliveryConfirmation>);

#[async_trait]
impl DeliveryConfirmations for FixedConfirmations {
    async fn confirmations(&self) -> Result<Vec<DeliveryConfirmation>, ConfirmationError> {
        Ok(self.0.clone())
    }
}

fn confirmed(tag: &str) -> DeliveryConfirmation {
    DeliveryConfirmation {
        fingerprint: fp(tag),
        receipt: DeliveryReceipt {
            message_id: format!("msg-{tag}"),
            accepted_at: Utc::now(),
        },
    }
}

#[tokio::test]
async fn reconciler_closes_gaps_with_superseding_entries() {
    let (_, _, ledger) = memory_ledger().await;
    let ledger = Arc::new(ledger);

    // Crash after send: only the intent made it to the ledger.
    let intent = ledger.append(draft("lost", Outcome::Pending)).await.unwrap();
    // Already consistent.
    ledger.append(draft("done", Outcome::Sent)).await.unwrap();

    let reconciler = Reconciler::new(
        ledger.clone(),
        Arc::new(FixedConfirmations(vec![
            confirmed("lost"),
            confirmed("done"),
            confirmed("unlogged"),
        ])),
        ReconcilerConfig::default(),
    );

    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.synthesized.len(), 2);

    let lost = ledger.find_by_fingerprint(&fp("lost")).await.unwrap().unwrap();
    assert_eq!(lost.outcome, Outcome::Sent);
    assert_eq!(lost.supersedes, Some(intent));
    assert_eq!(lost.initiator, "user:dex");
    let unlogged = ledger.find_by_fingerprint(&fp("unlogged")).await.unwrap().unwrap();
    assert_eq!(unlogged.outcome, Outcome::Sent);

    // A second pass finds nothing left to do.
    let again = reconciler.run_once().await.unwrap();
    assert!(again.synthesized.is_empty());
}

#[tokio::test]
async fn reconciler_abandons_stale_unconfirmed_pending() {
    let (_, _, ledger) = memory_ledger().await;
    let ledger = Arc::new(ledger);
    let mut stale = draft("stale", Outcome::Pending);
    stale.timestamp = Utc::now() - chrono::Duration::hours(1);
    ledger.append(stale).await.unwrap();
    ledger.append(draft("fresh", Outcome::Pending)).await.unwrap();

    let reconciler = Reconciler::new(
        ledger.clone(),
        Arc::new(FixedConfirmations(Vec::new())),
        ReconcilerConfig::default(),
    );
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.abandoned.len(), 1);

    let stale = ledger.find_by_fingerprint(&fp("stale")).await.unwrap().unwrap();
    assert_eq!(stale.outcome, Outcome::SendFailed);
    let fresh = ledger.find_by_fingerprint(&fp("fresh")).await.unwrap().unwrap();
    assert_eq!(fresh.outcome, Outcome::Pending);
}

#[tokio::test]
async fn reconciler_flushes_held_records_and_stops_on_shutdown() {
    let (storage, _, ledger) = memory_ledger().await;
    let ledger = Arc::new(ledger);
    storage.fail_next_appends(3);
    assert_eq!(
        ledger.append_durable(draft("held", Outcome::Sent)).await.unwrap(),
        Durability::Pending
    );

    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        Arc::new(FixedConfirmations(vec![confirmed("held")])),
        ReconcilerConfig {
            interval_secs: 1,
            pending_grace_secs: 300,
        },
    ));
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = reconciler.spawn(rx);

    // The first tick fires immediately.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    let entry = ledger.find_by_fingerprint(&fp("held")).await.unwrap().unwrap();
    assert_eq!(entry.outcome, Outcome::Sent);
    assert_eq!(entry.sequence, 1);
    assert!(entry.supersedes.is_none());
}
