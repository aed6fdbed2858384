//! `logout`: drop the cached credential scope

use std::sync::Arc;

use canonic_registry::ValidatorRegistry;
use canonic_runner::ValidationRunner;

use super::Context;
use crate::error::CliResult;
use crate::output::print_success;
use crate::runtime::{credential_gate, trust_store};

pub async fn execute(ctx: &Context) -> CliResult<()> {
    // Revocation is not itself gated, so no bundles need loading.
    let registry = Arc::new(ValidatorRegistry::new(trust_store(&ctx.config)?));
    let runner = ValidationRunner::new(registry, ctx.config.runner.clone());
    let gate = credential_gate(&ctx.config, runner);

    let scope = ctx.config.credentials.scope.clone();
    gate.revoke_scope(&scope).await?;
    print_success(&format!("Credential scope {scope} revoked"));
    Ok(())
}
