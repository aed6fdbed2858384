use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canonic_types::{DecisionKind, DeliveryConfirmation, LedgerAppend, Outcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::LedgerResult;
use crate::ledger::AuditLedger;

#[derive(Debug, Error)]
#[error("delivery confirmations unavailable: {0}")]
pub struct ConfirmationError(pub String);

/// The transport's own record of what it delivered.
#[async_trait]
pub trait DeliveryConfirmations: Send + Sync {
    async fn confirmations(&self) -> Result<Vec<DeliveryConfirmation>, ConfirmationError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// A `Pending` entry older than this with no delivery confirmation is
    /// closed as `SendFailed`.
    pub pending_grace_secs: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            pending_grace_secs: 300,
        }
    }
}

/// What one reconciliation pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Held records now committed.
    pub flushed: Vec<u64>,
    pub still_pending: usize,
    /// `Sent` entries synthesized from delivery confirmations.
    pub synthesized: Vec<u64>,
    /// Stale `Pending` entries closed as `SendFailed`.
    pub abandoned: Vec<u64>,
}

/// Closes gaps between the ledger and what actually happened.
///
/// Each pass flushes held records, then compares transport delivery
/// confirmations against effective ledger entries by fingerprint. History is
/// never rewritten; every correction is a new superseding entry.
pub struct Reconciler {
    ledger: Arc<AuditLedger>,
    confirmations: Arc<dyn DeliveryConfirmations>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<AuditLedger>,
        confirmations: Arc<dyn DeliveryConfirmations>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            confirmations,
            config,
        }
    }

    pub async fn run_once(&self) -> LedgerResult<ReconcileReport> {
        let flush = self.ledger.flush_pending().await;
        let mut report = ReconcileReport {
            flushed: flush.committed,
            still_pending: flush.still_pending,
            ..ReconcileReport::default()
        };

        let confirmations = match self.confirmations.confirmations().await {
            Ok(confirmations) => confirmations,
            Err(err) => {
                // Without confirmations we cannot tell a lost record from a
                // failed send, so leave Pending entries alone.
                warn!(error = %err, "Skipping delivery cross-check");
                return Ok(report);
            }
        };

        // Records still held in memory will be flushed later; do not
        // synthesize over them.
        let held: Vec<_> = self
            .ledger
            .pending()
            .into_iter()
            .map(|d| d.fingerprint)
            .collect();

        for confirmation in &confirmations {
            if held.contains(&confirmation.fingerprint) {
                continue;
            }
            let effective = self.ledger.find_by_fingerprint(&confirmation.fingerprint).await?;
            let detail = format!(
                "reconciled from delivery confirmation {}",
                confirmation.receipt.message_id
            );

            let draft = match effective {
                Some(entry) if entry.outcome == Outcome::Sent => continue,
                Some(entry) => entry
                    .to_append()
                    .reissue(Outcome::Sent, detail)
                    .superseding(entry.sequence),
                None => LedgerAppend::new(
                    confirmation.fingerprint.clone(),
                    DecisionKind::Proceed,
                    Outcome::Sent,
                )
                .with_detail(detail),
            };

            let sequence = self.ledger.append(draft).await?;
            info!(
                fingerprint = %confirmation.fingerprint,
                sequence,
                "Synthesized sent entry from delivery confirmation"
            );
            report.synthesized.push(sequence);
        }

        let grace = chrono::Duration::seconds(self.config.pending_grace_secs);
        for entry in self.ledger.effective_pending().await? {
            if Utc::now() - entry.timestamp < grace {
                continue;
            }
            let confirmed = confirmations
                .iter()
                .any(|c| c.fingerprint == entry.fingerprint);
            if confirmed || held.contains(&entry.fingerprint) {
                continue;
            }
            let draft = entry
                .to_append()
                .reissue(Outcome::SendFailed, "interrupted before delivery was confirmed")
                .superseding(entry.sequence);
            let sequence = self.ledger.append(draft).await?;
            warn!(
                fingerprint = %entry.fingerprint,
                sequence,
                "Closed stale pending entry as send_failed"
            );
            report.abandoned.push(sequence);
        }

        debug!(?report, "Reconciliation pass complete");
        Ok(report)
    }

    /// Run passes every `interval_secs` until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                self.config.interval_secs.max(1),
            ));
            info!("Ledger reconciler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Ledger reconciliation failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Ledger reconciler stopped");
        })
    }
}
