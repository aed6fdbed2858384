use std::collections::BTreeSet;

use async_trait::async_trait;
use canonic_registry::{Validator, ValidatorFault};
use canonic_types::{ActionContext, Verdict};
use serde::{Deserialize, Serialize};

pub const RECIPIENT_ID: &str = "recipient.allowlist";
pub const INITIATOR_ID: &str = "initiator.allowlist";
pub const TEMPLATE_ID: &str = "template.source";

/// Payload of `recipient.allowlist`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecipientAllowlistConfig {
    /// Permitted recipient domains, matched case-insensitively and exactly.
    pub domains: BTreeSet<String>,
}

/// Blocks any recipient outside the permitted domains.
pub struct RecipientAllowlist {
    domains: BTreeSet<String>,
}

impl RecipientAllowlist {
    pub fn new(config: RecipientAllowlistConfig) -> Self {
        Self {
            domains: config.domains.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Validator for RecipientAllowlist {
    fn id(&self) -> &str {
        RECIPIENT_ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        let denied: Vec<&str> = context
            .recipient_domains()
            .into_iter()
            .filter(|d| !self.domains.contains(*d))
            .collect();

        if denied.is_empty() {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::fail(format!(
                "domain not permitted: {}",
                denied.join(", ")
            )))
        }
    }
}

/// Payload of `initiator.allowlist`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InitiatorAllowlistConfig {
    pub initiators: BTreeSet<String>,
}

/// Gates credential access on who initiated the action.
pub struct InitiatorAllowlist {
    initiators: BTreeSet<String>,
}

impl InitiatorAllowlist {
    pub fn new(config: InitiatorAllowlistConfig) -> Self {
        Self {
            initiators: config.initiators,
        }
    }
}

#[async_trait]
impl Validator for InitiatorAllowlist {
    fn id(&self) -> &str {
        INITIATOR_ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        if self.initiators.contains(&context.initiator) {
            Ok(Verdict::Pass)
        } else {
            Ok(Verdict::fail(format!(
                "initiator not permitted: {}",
                context.initiator
            )))
        }
    }
}

/// Payload of `template.source`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TemplateSourceConfig {
    /// Permitted template ids. A trailing `*` matches any suffix.
    pub allowed: Vec<String>,
}

/// Restricts which templates may be loaded into a message.
pub struct TemplateSource {
    allowed: Vec<String>,
}

impl TemplateSource {
    pub fn new(config: TemplateSourceConfig) -> Self {
        Self {
            allowed: config.allowed,
        }
    }

    fn permits(&self, template: &str) -> bool {
        self.allowed.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => template.starts_with(prefix),
            None => pattern == template,
        })
    }
}

#[async_trait]
impl Validator for TemplateSource {
    fn id(&self) -> &str {
        TEMPLATE_ID
    }

    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault> {
        match &context.template_id {
            None => Ok(Verdict::Pass),
            Some(id) if self.permits(id.as_str()) => Ok(Verdict::Pass),
            Some(id) => Ok(Verdict::fail(format!("template not permitted: {}", id))),
        }
    }
}
