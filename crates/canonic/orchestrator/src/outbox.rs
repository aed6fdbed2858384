use std::path::{Path, PathBuf};

use async_trait::async_trait;
use canonic_credentials::Credential;
use canonic_ledger::{ConfirmationError, DeliveryConfirmations};
use canonic_types::{ActionContext, DeliveryConfirmation, DeliveryReceipt, Fingerprint, TemplateId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport::{MailTransport, TransportError};

const MESSAGE_EXTENSION: &str = "json";

/// A message as written to the outbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub fingerprint: Fingerprint,
    pub receipt: DeliveryReceipt,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub initiator: String,
}

/// Transport that delivers by writing one JSON file per fingerprint.
///
/// A second send of the same fingerprint returns the original receipt, and
/// the directory contents double as the delivery confirmations the
/// reconciler consumes.
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir
            .join(format!("{}.{MESSAGE_EXTENSION}", fingerprint.as_str()))
    }

    async fn read_message(path: &Path) -> Result<OutboxMessage, String> {
        let raw = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
        serde_json::from_slice(&raw).map_err(|e| e.to_string())
    }

    /// All delivered messages, ordered by acceptance time.
    pub async fn messages(&self) -> std::io::Result<Vec<OutboxMessage>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MESSAGE_EXTENSION) {
                continue;
            }
            match Self::read_message(&path).await {
                Ok(message) => messages.push(message),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable outbox message"),
            }
        }
        messages.sort_by(|a, b| a.receipt.accepted_at.cmp(&b.receipt.accepted_at));
        Ok(messages)
    }
}

#[async_trait]
impl MailTransport for OutboxTransport {
    async fn send(
        &self,
        context: &ActionContext,
        credential: &Credential,
    ) -> Result<DeliveryReceipt, TransportError> {
        if credential.is_expired() {
            return Err(TransportError::Fatal("credential expired".into()));
        }

        let fingerprint = context.fingerprint();
        let path = self.path_for(&fingerprint);
        if let Ok(existing) = Self::read_message(&path).await {
            debug!(fingerprint = %fingerprint, "Outbox already holds this action");
            return Ok(existing.receipt);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;

        let message = OutboxMessage {
            receipt: DeliveryReceipt {
                message_id: format!("outbox-{}", fingerprint.short()),
                accepted_at: Utc::now(),
            },
            fingerprint,
            recipients: context.recipients.iter().cloned().collect(),
            subject: context.subject.clone(),
            body: context.body.clone(),
            template_id: context.template_id.clone(),
            initiator: context.initiator.clone(),
        };
        let json = serde_json::to_vec_pretty(&message)
            .map_err(|e| TransportError::Fatal(e.to_string()))?;

        // Write then rename so a crash never leaves a half-written message.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TransportError::Retryable(e.to_string()))?;

        debug!(
            fingerprint = %message.fingerprint,
            message_id = %message.receipt.message_id,
            "Message written to outbox"
        );
        Ok(message.receipt)
    }
}

#[async_trait]
impl DeliveryConfirmations for OutboxTransport {
    async fn confirmations(&self) -> Result<Vec<DeliveryConfirmation>, ConfirmationError> {
        let messages = self
            .messages()
            .await
            .map_err(|e| ConfirmationError(e.to_string()))?;
        Ok(messages
            .into_iter()
            .map(|m| DeliveryConfirmation {
                fingerprint: m.fingerprint,
                receipt: m.receipt,
            })
            .collect())
    }
}
