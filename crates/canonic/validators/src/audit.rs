use async_trait::async_trait;
use canonic_registry::{Validator, ValidatorFault};
use canonic_types::{ActionContext, Verdict};
use serde::{Deserialize, Serialize};

pub const ID: &str = "email.audit";

/// Payload of the `email.audit` validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailAuditConfig {
    /// Fields that must be present: any of `to`, `subject`, `body`, `timestamp`.
    #[serde(default = "default_required")]
    pub required: Vec<String>,
}

fn default_required() -> Vec<String> {
    vec!["to".into(), "subject".into(), "timestamp".into()]
}

impl Default for EmailAuditConfig {
    fn default() -> Self {
        Self {
            required: default_required(),
        }
    }
}

/// Structural audit of an outgoing message.
pub struct EmailAudit {
    config: EmailAuditConfig,
}

impl EmailAudit {
    pub fn new(config: EmailAuditConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Validator for EmailAudit {
    fn id(&self) -> &str {
        ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        let mut missing = Vec::new();
        for field in &self.config.required {
            let present = match field.as_str() {
                "to" => !context.recipients.is_empty(),
                "subject" => !context.subject.trim().is_empty(),
                "body" => !context.body.trim().is_empty(),
                // Always populated by the context builder; a zero epoch means
                // the caller forged it.
                "timestamp" => context.timestamp.timestamp() > 0,
                other => {
                    return Err(ValidatorFault::Misconfigured(format!(
                        "unknown required field: {}",
                        other
                    )))
                }
            };
            if !present {
                missing.push(field.as_str());
            }
        }

        if missing.is_empty() {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::fail(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}
