//! In-memory transport and template store for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use canonic_credentials::Credential;
use canonic_types::{ActionContext, DeliveryReceipt, Fingerprint, TemplateId};
use chrono::Utc;

use crate::template::{Template, TemplateError, TemplateStore, TemplateSummary};
use crate::transport::{MailTransport, TransportError};

/// Transport that plays back scripted failures, then succeeds.
///
/// Records every fingerprint it accepted.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    delivered: Mutex<Vec<Fingerprint>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with each of `errors` in turn before succeeding.
    pub fn failing_with(errors: impl IntoIterator<Item = TransportError>) -> Self {
        Self {
            script: Mutex::new(errors.into_iter().map(Err).collect()),
            ..Self::default()
        }
    }

    /// Sleep this long inside every send.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Fingerprint> {
        self.delivered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn next_step(&self) -> Result<(), TransportError> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(
        &self,
        context: &ActionContext,
        _credential: &Credential,
    ) -> Result<DeliveryReceipt, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_step()?;

        let fingerprint = context.fingerprint();
        let receipt = DeliveryReceipt {
            message_id: format!("scripted-{}-{call}", fingerprint.short()),
            accepted_at: Utc::now(),
        };
        self.delivered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(fingerprint);
        Ok(receipt)
    }
}

/// Templates held in a map.
#[derive(Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<HashMap<TemplateId, Template>>,
    loads: AtomicUsize,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template from its raw text.
    pub fn insert(&self, id: &str, raw: &str) {
        let template = Template::parse(TemplateId::new(id), raw);
        self.templates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(template.id.clone(), template);
    }

    /// Number of `load` calls, found or not.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn load(&self, id: &TemplateId) -> Result<Template, TemplateError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.templates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(id.clone()))
    }

    async fn list(&self) -> Result<Vec<TemplateSummary>, TemplateError> {
        let templates = self
            .templates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut summaries: Vec<TemplateSummary> = templates
            .values()
            .map(|t| TemplateSummary {
                id: t.id.clone(),
                subject: t.subject.clone(),
                version: t.version.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }
}
