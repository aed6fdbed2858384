use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use canonic_credentials::{Credential, CredentialError, CredentialGate};
use canonic_ledger::{AuditLedger, BackoffConfig, Durability, LedgerError};
use canonic_runner::ValidationRunner;
use canonic_types::{
    ActionContext, AttributedVerdict, ContextError, Decision, DecisionKind, DeliveryReceipt,
    Fingerprint, LedgerAppend, Outcome, TemplateId, TriggerPoint, VerdictSummary,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::state::{ActionState, StateMachine};
use crate::template::{Template, TemplateStore};
use crate::transport::{MailTransport, TransportError};

/// Orchestrator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Transport attempts per action, the first one included.
    pub max_send_attempts: u32,
    pub send_timeout_ms: u64,
    /// Delay between transport attempts. `max_attempts` is ignored here.
    pub send_backoff: BackoffConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: 3,
            send_timeout_ms: 10_000,
            send_backoff: BackoffConfig {
                initial_delay_ms: 500,
                max_delay_ms: 10_000,
                ..BackoffConfig::default()
            },
        }
    }
}

impl OrchestratorConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// What the caller wants sent.
///
/// Without a template both `subject` and `body` are required. With one, each
/// of them that is given overrides the template's.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendRequest {
    pub initiator: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub template: Option<TemplateId>,
    /// Fixes the action's timestamp, and with it the fingerprint, so a retry
    /// of the same request is recognized as the same action.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SendRequest {
    pub fn new(initiator: impl Into<String>) -> Self {
        Self {
            initiator: initiator.into(),
            ..Self::default()
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipients.push(recipient.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn template(mut self, id: impl Into<String>) -> Self {
        self.template = Some(TemplateId::new(id));
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn require_content(&self) -> Result<(), ContextError> {
        if self.template.is_none() && (self.subject.is_none() || self.body.is_none()) {
            return Err(ContextError::MissingContent);
        }
        Ok(())
    }

    fn context(
        &self,
        timestamp: DateTime<Utc>,
        template: Option<&Template>,
    ) -> Result<ActionContext, ContextError> {
        let mut builder = ActionContext::builder(self.initiator.as_str())
            .recipients(self.recipients.iter().map(String::as_str))
            .timestamp(timestamp);

        let subject = self
            .subject
            .clone()
            .or_else(|| template.map(|t| t.subject.clone()));
        let body = self.body.clone().or_else(|| template.map(|t| t.body.clone()));
        builder = builder
            .subject(subject.unwrap_or_default())
            .body(body.unwrap_or_default());

        if let Some(id) = &self.template {
            builder = builder.template(id.clone());
        }
        if let Some(template) = template {
            builder = builder.template_version(template.version.clone());
        }
        builder.build()
    }
}

/// Result of one submission.
#[derive(Clone, Debug, Serialize)]
pub struct ActionReport {
    pub fingerprint: Fingerprint,
    pub outcome: Outcome,
    pub decision: DecisionKind,
    /// Failure or warning messages behind `decision`.
    pub reasons: Vec<String>,
    pub verdicts: Vec<VerdictSummary>,
    pub detail: Option<String>,
    pub durability: Durability,
    pub receipt: Option<DeliveryReceipt>,
    /// The action was already logged as sent; nothing was sent again.
    pub duplicate: bool,
    pub send_attempts: u32,
    pub states: Vec<ActionState>,
}

impl ActionReport {
    pub fn final_state(&self) -> Option<ActionState> {
        self.states.last().copied()
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.durability, Durability::Committed(_))
    }

    pub fn sequence(&self) -> Option<u64> {
        match self.durability {
            Durability::Committed(sequence) => Some(sequence),
            Durability::Pending => None,
        }
    }
}

/// Mutable bookkeeping for one submission.
struct Attempt {
    machine: StateMachine,
    verdicts: Vec<AttributedVerdict>,
    send_attempts: u32,
    /// Where the `Pending` intent entry went, once written.
    intent: Option<Durability>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            machine: StateMachine::new(),
            verdicts: Vec::new(),
            send_attempts: 0,
            intent: None,
        }
    }

    fn advance(&mut self, next: ActionState) -> Result<(), OrchestratorError> {
        self.machine.advance(next)
    }
}

/// How an attempt ended, before it is logged.
struct Conclusion {
    outcome: Outcome,
    decision: Decision,
    detail: Option<String>,
    receipt: Option<DeliveryReceipt>,
}

impl Conclusion {
    fn blocked(decision: Decision, detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Blocked,
            decision,
            detail: Some(detail.into()),
            receipt: None,
        }
    }

    fn failed(decision: Decision, detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::SendFailed,
            decision,
            detail: Some(detail.into()),
            receipt: None,
        }
    }

    fn cancelled(decision: Decision) -> Self {
        Self {
            outcome: Outcome::Cancelled,
            decision,
            detail: Some("cancelled before sending".into()),
            receipt: None,
        }
    }
}

/// Removes a fingerprint from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Fingerprint>>,
    fingerprint: Fingerprint,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.fingerprint);
    }
}

/// Drives actions through validation, credentials, transport and the ledger.
///
/// Every submission that gets past request parsing ends in exactly one
/// terminal ledger entry, or is reported as a duplicate of one.
pub struct ActionOrchestrator {
    runner: ValidationRunner,
    credentials: Arc<CredentialGate>,
    transport: Arc<dyn MailTransport>,
    templates: Arc<dyn TemplateStore>,
    ledger: Arc<AuditLedger>,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<Fingerprint>>,
}

impl ActionOrchestrator {
    pub fn new(
        runner: ValidationRunner,
        credentials: Arc<CredentialGate>,
        transport: Arc<dyn MailTransport>,
        templates: Arc<dyn TemplateStore>,
        ledger: Arc<AuditLedger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runner,
            credentials,
            transport,
            templates,
            ledger,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn credentials(&self) -> &Arc<CredentialGate> {
        &self.credentials
    }

    pub fn templates(&self) -> &Arc<dyn TemplateStore> {
        &self.templates
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one action to completion.
    pub async fn submit(&self, request: SendRequest) -> Result<ActionReport, OrchestratorError> {
        self.execute(request, None).await
    }

    /// Like [`submit`](Self::submit), but abandons the action as `Cancelled`
    /// if `cancel` turns true before the transport is invoked.
    pub async fn submit_cancellable(
        &self,
        request: SendRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<ActionReport, OrchestratorError> {
        self.execute(request, Some(cancel)).await
    }

    async fn execute(
        &self,
        request: SendRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ActionReport, OrchestratorError> {
        request.require_content()?;
        let timestamp = request.timestamp.unwrap_or_else(Utc::now);
        let mut attempt = Attempt::new();

        let context = match &request.template {
            None => request.context(timestamp, None)?,
            Some(id) => {
                let load_context = request.context(timestamp, None)?;
                let load_check = self.runner.run(TriggerPoint::OnResourceLoad, &load_context).await;
                attempt.verdicts.extend(load_check.verdicts.iter().cloned());
                if !load_check.decision.permits_action() {
                    let detail = format!(
                        "template load blocked: {}",
                        load_check.decision.reasons().join("; ")
                    );
                    attempt.advance(ActionState::Blocked)?;
                    let conclusion = Conclusion::blocked(load_check.decision, detail);
                    return self.conclude(attempt, &load_context, conclusion).await;
                }

                match self.templates.load(id).await {
                    Ok(template) => request.context(timestamp, Some(&template))?,
                    Err(err) => {
                        warn!(template = %id, error = %err, "Template unavailable");
                        let reason = err.to_string();
                        attempt.advance(ActionState::Blocked)?;
                        let conclusion =
                            Conclusion::blocked(Decision::Blocked(vec![reason.clone()]), reason);
                        return self.conclude(attempt, &load_context, conclusion).await;
                    }
                }
            }
        };

        let fingerprint = context.fingerprint();
        let _claim = self.claim(&fingerprint)?;

        if let Some(existing) = self.ledger.find_by_fingerprint(&fingerprint).await? {
            match existing.outcome {
                Outcome::Sent => {
                    info!(fingerprint = %fingerprint, sequence = existing.sequence, "Action already sent, not resending");
                    attempt.advance(ActionState::Logged)?;
                    return Ok(ActionReport {
                        fingerprint,
                        outcome: Outcome::Sent,
                        decision: existing.decision,
                        reasons: Vec::new(),
                        verdicts: existing.verdicts,
                        detail: existing.outcome_detail,
                        durability: Durability::Committed(existing.sequence),
                        receipt: None,
                        duplicate: true,
                        send_attempts: 0,
                        states: attempt.machine.path().to_vec(),
                    });
                }
                Outcome::Pending => {
                    return Err(OrchestratorError::AlreadyInFlight {
                        fingerprint,
                        sequence: Some(existing.sequence),
                    });
                }
                _ => {}
            }
        }

        if is_cancelled(&cancel) {
            attempt.advance(ActionState::Cancelled)?;
            let decision = Decision::from_verdicts(attempt.verdicts.iter().map(|v| &v.verdict));
            return self
                .conclude(attempt, &context, Conclusion::cancelled(decision))
                .await;
        }

        attempt.advance(ActionState::Validating)?;
        let validation = self.runner.run(TriggerPoint::PreAction, &context).await;
        attempt.verdicts.extend(validation.verdicts.iter().cloned());
        let decision = Decision::from_verdicts(attempt.verdicts.iter().map(|v| &v.verdict));
        if !decision.permits_action() {
            let detail = decision.reasons().join("; ");
            attempt.advance(ActionState::Blocked)?;
            return self
                .conclude(attempt, &context, Conclusion::blocked(decision, detail))
                .await;
        }
        attempt.advance(ActionState::Validated)?;

        if is_cancelled(&cancel) {
            attempt.advance(ActionState::Cancelled)?;
            return self
                .conclude(attempt, &context, Conclusion::cancelled(decision))
                .await;
        }

        let obtained = self.obtain_credential(&context, &mut attempt).await;
        // Credential-access verdicts join the pre-action ones.
        let decision = Decision::from_verdicts(attempt.verdicts.iter().map(|v| &v.verdict));
        let credential = match obtained {
            Ok(credential) => credential,
            Err(err) if err.is_unauthorized() => {
                let reason = err.to_string();
                let decision = match decision {
                    Decision::Blocked(reasons) => Decision::Blocked(reasons),
                    _ => Decision::Blocked(vec![reason.clone()]),
                };
                attempt.advance(ActionState::Blocked)?;
                return self
                    .conclude(attempt, &context, Conclusion::blocked(decision, reason))
                    .await;
            }
            Err(err) => {
                attempt.advance(ActionState::SendFailed)?;
                return self
                    .conclude(attempt, &context, Conclusion::failed(decision, err.to_string()))
                    .await;
            }
        };

        if is_cancelled(&cancel) {
            self.credentials.release(credential);
            attempt.advance(ActionState::Cancelled)?;
            return self
                .conclude(attempt, &context, Conclusion::cancelled(decision))
                .await;
        }

        if let Err(err) = self.record_intent(&context, &decision, &mut attempt).await {
            self.credentials.release(credential);
            return Err(err);
        }

        attempt.advance(ActionState::Sending)?;
        let sent = self.send_with_retries(&context, &credential, &mut attempt).await;
        self.credentials.release(credential);

        let conclusion = match sent {
            Ok(receipt) => {
                attempt.advance(ActionState::Sent)?;
                Conclusion {
                    outcome: Outcome::Sent,
                    detail: Some(format!("accepted as {}", receipt.message_id)),
                    decision,
                    receipt: Some(receipt),
                }
            }
            Err(err) => {
                attempt.advance(ActionState::SendFailed)?;
                Conclusion::failed(decision, err.to_string())
            }
        };
        self.conclude(attempt, &context, conclusion).await
    }

    fn claim(&self, fingerprint: &Fingerprint) -> Result<InFlight<'_>, OrchestratorError> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(fingerprint.clone()) {
            return Err(OrchestratorError::AlreadyInFlight {
                fingerprint: fingerprint.clone(),
                sequence: None,
            });
        }
        Ok(InFlight {
            set: &self.in_flight,
            fingerprint: fingerprint.clone(),
        })
    }

    async fn obtain_credential(
        &self,
        context: &ActionContext,
        attempt: &mut Attempt,
    ) -> Result<Credential, CredentialError> {
        let grant = match self.credentials.authorize(context).await {
            Ok(grant) => {
                attempt
                    .verdicts
                    .extend(grant.validation().verdicts.iter().cloned());
                grant
            }
            Err(CredentialError::Unauthorized {
                reason,
                validation: Some(validation),
            }) => {
                attempt.verdicts.extend(validation.verdicts.iter().cloned());
                return Err(CredentialError::Unauthorized {
                    reason,
                    validation: Some(validation),
                });
            }
            Err(err) => return Err(err),
        };
        let scope = self.credentials.config().scope.clone();
        self.credentials.acquire(grant, &scope).await
    }

    /// Write the `Pending` entry that marks the action as about to be sent.
    async fn record_intent(
        &self,
        context: &ActionContext,
        decision: &Decision,
        attempt: &mut Attempt,
    ) -> Result<(), OrchestratorError> {
        let fingerprint = context.fingerprint();
        let mut intent = LedgerAppend::new(fingerprint.clone(), decision.kind(), Outcome::Pending)
            .with_verdicts(&attempt.verdicts)
            .with_detail("sending")
            .initiated_by(context.initiator.as_str(), context.recipients.len());
        if let Some(sequence) = self.retry_target(&fingerprint).await? {
            intent = intent.superseding(sequence);
        }
        let durability = self.ledger.append_durable(intent).await?;
        debug!(fingerprint = %fingerprint, durability = ?durability, "Send intent recorded");
        attempt.intent = Some(durability);
        Ok(())
    }

    async fn send_with_retries(
        &self,
        context: &ActionContext,
        credential: &Credential,
        attempt: &mut Attempt,
    ) -> Result<DeliveryReceipt, TransportError> {
        let max_attempts = self.config.max_send_attempts.max(1);
        let timeout = self.config.send_timeout();
        let fingerprint = context.fingerprint();

        loop {
            attempt.send_attempts += 1;
            let number = attempt.send_attempts;
            let error = match tokio::time::timeout(timeout, self.transport.send(context, credential)).await {
                Ok(Ok(receipt)) => {
                    debug!(fingerprint = %fingerprint, attempt = number, message_id = %receipt.message_id, "Transport accepted message");
                    return Ok(receipt);
                }
                Ok(Err(err)) => err,
                Err(_) => TransportError::Retryable(format!(
                    "send timed out after {}ms",
                    self.config.send_timeout_ms
                )),
            };

            if !error.is_retryable() || number >= max_attempts {
                warn!(fingerprint = %fingerprint, attempts = number, error = %error, "Send failed");
                return Err(error);
            }

            let delay = self.config.send_backoff.delay_for(number);
            warn!(
                fingerprint = %fingerprint,
                attempt = number,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Send attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Effective entry a new attempt at `fingerprint` must supersede.
    async fn retry_target(&self, fingerprint: &Fingerprint) -> Result<Option<u64>, OrchestratorError> {
        Ok(self
            .ledger
            .find_by_fingerprint(fingerprint)
            .await?
            .filter(|e| e.outcome.is_retryable())
            .map(|e| e.sequence))
    }

    async fn conclude(
        &self,
        mut attempt: Attempt,
        context: &ActionContext,
        conclusion: Conclusion,
    ) -> Result<ActionReport, OrchestratorError> {
        attempt.advance(ActionState::Logging)?;
        let fingerprint = context.fingerprint();

        let mut draft = LedgerAppend::new(
            fingerprint.clone(),
            conclusion.decision.kind(),
            conclusion.outcome,
        )
        .with_verdicts(&attempt.verdicts)
        .initiated_by(context.initiator.as_str(), context.recipients.len());
        if let Some(detail) = &conclusion.detail {
            draft = draft.with_detail(detail.clone());
        }

        let supersedes = match attempt.intent {
            Some(Durability::Committed(sequence)) => Some(sequence),
            // Held intent: the ledger links the two when both are flushed.
            Some(Durability::Pending) => None,
            None => self.retry_target(&fingerprint).await?,
        };
        if let Some(sequence) = supersedes {
            draft = draft.superseding(sequence);
        }

        let verdicts = draft.verdicts.clone();
        let durability = match self.ledger.append_durable(draft).await {
            Ok(durability) => durability,
            Err(err @ LedgerError::InvalidSupersede { .. }) if conclusion.outcome == Outcome::Sent => {
                // A reconciler pass may have recorded the delivery first.
                match self.ledger.find_by_fingerprint(&fingerprint).await? {
                    Some(existing) if existing.outcome == Outcome::Sent => {
                        info!(
                            fingerprint = %fingerprint,
                            sequence = existing.sequence,
                            "Delivery already reconciled into the ledger"
                        );
                        Durability::Committed(existing.sequence)
                    }
                    _ => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        attempt.advance(ActionState::Logged)?;

        info!(
            fingerprint = %fingerprint,
            outcome = %conclusion.outcome,
            decision = %conclusion.decision.kind(),
            durability = ?durability,
            send_attempts = attempt.send_attempts,
            "Action logged"
        );

        Ok(ActionReport {
            fingerprint,
            outcome: conclusion.outcome,
            decision: conclusion.decision.kind(),
            reasons: conclusion.decision.reasons().to_vec(),
            verdicts,
            detail: conclusion.detail,
            durability,
            receipt: conclusion.receipt,
            duplicate: false,
            send_attempts: attempt.send_attempts,
            states: attempt.machine.path().to_vec(),
        })
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}
