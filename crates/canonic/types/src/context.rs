use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{Fingerprint, TemplateId};

/// Domain separator mixed into every fingerprint.
const FINGERPRINT_DOMAIN: &[u8] = b"canonic-action-context/v1";

/// Errors raised while assembling an [`ActionContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("initiator must not be empty")]
    MissingInitiator,

    #[error("malformed recipient address: {0}")]
    MalformedRecipient(String),

    #[error("provide a template or both a subject and a body")]
    MissingContent,
}

/// The subject of validation: one immutable snapshot of a send attempt.
///
/// Every validator receives the same snapshot by shared reference. The
/// fingerprint is a pure function of the fields below, so a retry of the same
/// action (same recipients, content, timestamp and initiator) maps onto the
/// same ledger history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    /// Normalized (trimmed, lowercased) recipient addresses.
    pub recipients: BTreeSet<String>,
    pub subject: String,
    pub body: String,
    pub template_id: Option<TemplateId>,
    /// Content version of the template the body was rendered from.
    pub template_version: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub initiator: String,
}

impl ActionContext {
    /// Start building a context for the given initiator.
    pub fn builder(initiator: impl Into<String>) -> ActionContextBuilder {
        ActionContextBuilder::new(initiator)
    }

    /// Deterministic BLAKE3 fingerprint of this context.
    ///
    /// Fields are length-prefixed so no two distinct contexts share an encoding.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(FINGERPRINT_DOMAIN);

        hasher.update(&(self.recipients.len() as u64).to_le_bytes());
        for recipient in &self.recipients {
            write_field(&mut hasher, recipient.as_bytes());
        }
        write_field(&mut hasher, self.subject.as_bytes());
        write_field(&mut hasher, self.body.as_bytes());
        match &self.template_id {
            Some(id) => {
                hasher.update(&[1]);
                write_field(&mut hasher, id.as_str().as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match &self.template_version {
            Some(version) => {
                hasher.update(&[1]);
                write_field(&mut hasher, version.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        let ts = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        write_field(&mut hasher, ts.as_bytes());
        write_field(&mut hasher, self.initiator.as_bytes());

        Fingerprint::from_hash(hasher.finalize())
    }

    /// Domains of all recipients (the part after `@`).
    pub fn recipient_domains(&self) -> BTreeSet<&str> {
        self.recipients
            .iter()
            .filter_map(|r| r.rsplit_once('@').map(|(_, domain)| domain))
            .collect()
    }

    /// BLAKE3 digest of the body, for logs that must not carry content.
    pub fn body_digest(&self) -> String {
        blake3::hash(self.body.as_bytes()).to_hex().to_string()
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Builder for [`ActionContext`].
///
/// Structural checks only; policy lives in validators.
pub struct ActionContextBuilder {
    initiator: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
    template_id: Option<TemplateId>,
    template_version: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl ActionContextBuilder {
    pub fn new(initiator: impl Into<String>) -> Self {
        Self {
            initiator: initiator.into(),
            recipients: Vec::new(),
            subject: String::new(),
            body: String::new(),
            template_id: None,
            template_version: None,
            timestamp: None,
        }
    }

    pub fn recipient(mut self, address: impl Into<String>) -> Self {
        self.recipients.push(address.into());
        self
    }

    pub fn recipients<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients.extend(addresses.into_iter().map(Into::into));
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn template(mut self, id: TemplateId) -> Self {
        self.template_id = Some(id);
        self
    }

    pub fn template_version(mut self, version: impl Into<String>) -> Self {
        self.template_version = Some(version.into());
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// Finish the snapshot. Timestamp defaults to now.
    pub fn build(self) -> Result<ActionContext, ContextError> {
        let initiator = self.initiator.trim().to_string();
        if initiator.is_empty() {
            return Err(ContextError::MissingInitiator);
        }

        let mut recipients = BTreeSet::new();
        for raw in self.recipients {
            let address = raw.trim().to_lowercase();
            if !is_plausible_address(&address) {
                return Err(ContextError::MalformedRecipient(raw));
            }
            recipients.insert(address);
        }

        Ok(ActionContext {
            recipients,
            subject: self.subject,
            body: self.body,
            template_id: self.template_id,
            template_version: self.template_version,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            initiator,
        })
    }
}

fn is_plausible_address(address: &str) -> bool {
    match address.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    fn proposal() -> ActionContext {
        ActionContext::builder("user:dex")
            .recipient("a@x.com")
            .subject("Proposal")
            .body("Hello")
            .template(TemplateId::new("proposal-v2"))
            .timestamp(fixed_time())
            .build()
            .unwrap()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(proposal().fingerprint(), proposal().fingerprint());
    }

    #[test]
    fn fingerprint_ignores_recipient_order_and_case() {
        let a = ActionContext::builder("user:dex")
            .recipients(["B@y.com", "a@x.com"])
            .timestamp(fixed_time())
            .build()
            .unwrap();
        let b = ActionContext::builder("user:dex")
            .recipients(["a@x.com", "b@y.com "])
            .timestamp(fixed_time())
            .build()
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let mut other = proposal();
        other.subject = "Proposal (revised)".into();
        assert_ne!(proposal().fingerprint(), other.fingerprint());

        let mut later = proposal();
        later.timestamp = fixed_time() + chrono::Duration::seconds(1);
        assert_ne!(proposal().fingerprint(), later.fingerprint());
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = ActionContext::builder("u")
            .subject("ab")
            .body("c")
            .timestamp(fixed_time())
            .build()
            .unwrap();
        let b = ActionContext::builder("u")
            .subject("a")
            .body("bc")
            .timestamp(fixed_time())
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn builder_rejects_malformed_recipients() {
        let err = ActionContext::builder("user:dex")
            .recipient("not-an-address")
            .build()
            .unwrap_err();
        assert!(matches!(err, ContextError::MalformedRecipient(_)));
    }

    #[test]
    fn builder_rejects_empty_initiator() {
        let err = ActionContext::builder("  ").build().unwrap_err();
        assert_eq!(err, ContextError::MissingInitiator);
    }

    #[test]
    fn recipient_domains_are_extracted() {
        let ctx = ActionContext::builder("user:dex")
            .recipients(["a@x.com", "b@x.com", "c@y.org"])
            .build()
            .unwrap();
        let domains: Vec<_> = ctx.recipient_domains().into_iter().collect();
        assert_eq!(domains, vec!["x.com", "y.org"]);
    }
}
