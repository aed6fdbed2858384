//! `reconcile`: one reconciliation pass

use std::sync::Arc;

use canonic_ledger::Reconciler;
use canonic_orchestrator::OutboxTransport;

use super::Context;
use crate::error::CliResult;
use crate::output::{print_info, print_single, print_success, OutputFormat};
use crate::runtime::open_ledger;

pub async fn execute(ctx: &Context) -> CliResult<()> {
    let ledger = open_ledger(&ctx.config, &ctx.paths).await?;
    let outbox = Arc::new(OutboxTransport::new(&ctx.paths.outbox));
    let reconciler = Reconciler::new(ledger, outbox, ctx.config.reconciler.clone());
    let report = reconciler.run_once().await?;

    if ctx.format != OutputFormat::Table {
        return print_single(&report, ctx.format);
    }

    if report.synthesized.is_empty() && report.abandoned.is_empty() {
        print_success("Ledger and outbox agree");
    }
    if !report.synthesized.is_empty() {
        print_info(&format!(
            "Recorded {} confirmed deliveries: entries {:?}",
            report.synthesized.len(),
            report.synthesized
        ));
    }
    if !report.abandoned.is_empty() {
        print_info(&format!(
            "Closed {} interrupted sends as failed: entries {:?}",
            report.abandoned.len(),
            report.abandoned
        ));
    }
    Ok(())
}
