use std::sync::Mutex;

use canonic_types::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A record has been held in memory past the alert threshold.
    PendingRetriesExceeded,
    /// The hash chain failed verification.
    ChainBroken,
}

/// Something an operator must act on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalAlert {
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
    pub fingerprint: Option<Fingerprint>,
    pub attempts: u32,
    pub message: String,
}

/// Destination for operational alerts.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: OperationalAlert);
}

/// Emits alerts as `error!` events.
#[derive(Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: OperationalAlert) {
        let fingerprint = alert.fingerprint.as_ref().map(ToString::to_string);
        error!(
            kind = ?alert.kind,
            fingerprint = fingerprint.as_deref(),
            attempts = alert.attempts,
            "OPERATIONAL ALERT: {}",
            alert.message
        );
    }
}

/// Collects alerts for inspection.
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<OperationalAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<OperationalAlert> {
        self.alerts
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: OperationalAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}
