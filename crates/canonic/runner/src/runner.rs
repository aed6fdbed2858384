use std::sync::Arc;
use std::time::Duration;

use canonic_registry::{ResolvedValidator, ValidatorRegistry};
use canonic_types::{ActionContext, AggregateResult, AttributedVerdict, TriggerPoint, Verdict};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reason recorded when a validator exceeds its time bound.
pub const TIMEOUT_REASON: &str = "timeout";

/// Prefix of the reason recorded when a validator panics or faults.
pub const CRASHED_PREFIX: &str = "validator crashed";

/// Runner configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-validator time bound in milliseconds.
    pub validator_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            validator_timeout_ms: 2_000,
        }
    }
}

impl RunnerConfig {
    pub fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms)
    }
}

enum TaskOutcome {
    Verdict(Verdict),
    Fault(String),
    TimedOut,
}

/// Runs validators from a registry against action contexts.
#[derive(Clone)]
pub struct ValidationRunner {
    registry: Arc<ValidatorRegistry>,
    config: RunnerConfig,
}

impl ValidationRunner {
    pub fn new(registry: Arc<ValidatorRegistry>, config: RunnerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Evaluate `context` against every validator at `trigger`.
    ///
    /// Verdicts come back in resolution order regardless of which task
    /// finished first.
    pub async fn run(&self, trigger: TriggerPoint, context: &ActionContext) -> AggregateResult {
        let validators = self.registry.resolve_order(trigger);
        if validators.is_empty() {
            debug!(trigger = %trigger, "No validators registered");
            return AggregateResult::empty(trigger);
        }

        let shared = Arc::new(context.clone());
        let timeout = self.config.validator_timeout();

        let handles: Vec<(ResolvedValidator, JoinHandle<TaskOutcome>)> = validators
            .into_iter()
            .map(|resolved| {
                let validator = Arc::clone(&resolved.validator);
                let ctx = Arc::clone(&shared);
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, validator.check(&ctx)).await {
                        Ok(Ok(verdict)) => TaskOutcome::Verdict(verdict),
                        Ok(Err(fault)) => TaskOutcome::Fault(fault.to_string()),
                        Err(_) => TaskOutcome::TimedOut,
                    }
                });
                (resolved, handle)
            })
            .collect();

        let mut verdicts = Vec::with_capacity(handles.len());
        for (resolved, handle) in handles {
            let id = &resolved.descriptor.id;
            let verdict = match handle.await {
                Ok(TaskOutcome::Verdict(verdict)) => verdict,
                Ok(TaskOutcome::TimedOut) => {
                    warn!(validator = %id, timeout_ms = self.config.validator_timeout_ms, "Validator timed out");
                    Verdict::fail(TIMEOUT_REASON)
                }
                Ok(TaskOutcome::Fault(fault)) => {
                    warn!(validator = %id, error = %fault, "Validator returned a fault");
                    Verdict::fail(format!("{}: {}", CRASHED_PREFIX, id))
                }
                Err(join_error) => {
                    warn!(validator = %id, error = %join_error, "Validator task crashed");
                    Verdict::fail(format!("{}: {}", CRASHED_PREFIX, id))
                }
            };

            debug!(validator = %id, verdict = %verdict.kind(), "Validator finished");
            verdicts.push(AttributedVerdict {
                validator_id: id.clone(),
                version: resolved.descriptor.version.clone(),
                verdict,
            });
        }

        let result = AggregateResult::new(trigger, verdicts);
        info!(
            trigger = %trigger,
            fingerprint = %context.fingerprint(),
            validators = result.verdicts.len(),
            decision = %result.decision.kind(),
            "Validation complete"
        );
        result
    }
}
