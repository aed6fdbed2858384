//! `submit`: run one governed send

use std::path::PathBuf;
use std::process::ExitCode;

use canonic_ledger::Durability;
use canonic_orchestrator::{ActionReport, SendRequest};
use canonic_types::{Outcome, TemplateId, VerdictKind};
use clap::Args;
use colored::*;
use tokio::sync::watch;
use tracing::info;

use super::Context;
use crate::error::CliResult;
use crate::output::{print_single, print_warning, OutputFormat};
use crate::runtime::Runtime;

/// Exit codes by outcome.
pub const EXIT_SENT: u8 = 0;
pub const EXIT_BLOCKED: u8 = 2;
pub const EXIT_SEND_FAILED: u8 = 3;
pub const EXIT_CANCELLED: u8 = 4;
pub const EXIT_NOT_DURABLE: u8 = 5;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Recipient address (repeatable)
    #[arg(long = "to", required = true)]
    pub to: Vec<String>,

    /// Subject line; overrides the template's
    #[arg(long)]
    pub subject: Option<String>,

    /// Message body; overrides the template's
    #[arg(long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the message body from a file
    #[arg(long)]
    pub body_file: Option<PathBuf>,

    /// Template id to render from the templates directory
    #[arg(long)]
    pub template: Option<String>,

    /// Identity recorded as the initiator
    #[arg(long, env = "CANONIC_MAIL_INITIATOR")]
    pub initiator: Option<String>,
}

pub async fn execute(args: SubmitArgs, ctx: &Context) -> CliResult<ExitCode> {
    let runtime = Runtime::open(&ctx.config, &ctx.paths).await?;

    let body = match (&args.body, &args.body_file) {
        (Some(body), _) => Some(body.clone()),
        (None, Some(path)) => Some(std::fs::read_to_string(path)?),
        (None, None) => None,
    };
    let request = SendRequest {
        initiator: ctx.config.initiator(args.initiator),
        recipients: args.to,
        subject: args.subject,
        body,
        template: args.template.map(TemplateId::new),
        timestamp: None,
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling before send");
            let _ = cancel_tx.send(true);
        }
    });

    let mut report = runtime
        .orchestrator
        .submit_cancellable(request, cancel_rx)
        .await?;

    if report.durability == Durability::Pending {
        let flushed = runtime.ledger.flush_pending().await;
        if flushed.still_pending == 0 {
            if let Some(sequence) = flushed.committed.last() {
                report.durability = Durability::Committed(*sequence);
            }
        }
    }

    print_report(&report, ctx.format)?;

    if report.durability == Durability::Pending {
        print_warning("ledger unavailable: the outcome above was not durably recorded");
        for draft in runtime.ledger.pending() {
            eprintln!("{}", serde_json::to_string(&draft)?);
        }
        return Ok(ExitCode::from(EXIT_NOT_DURABLE));
    }
    Ok(ExitCode::from(exit_code(report.outcome)))
}

pub fn exit_code(outcome: Outcome) -> u8 {
    match outcome {
        Outcome::Sent => EXIT_SENT,
        Outcome::Blocked => EXIT_BLOCKED,
        Outcome::SendFailed => EXIT_SEND_FAILED,
        Outcome::Cancelled => EXIT_CANCELLED,
        Outcome::Pending => EXIT_NOT_DURABLE,
    }
}

fn print_report(report: &ActionReport, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return print_single(report, format);
    }

    let outcome = match report.outcome {
        Outcome::Sent => "SENT".green().bold(),
        Outcome::Blocked => "BLOCKED".red().bold(),
        Outcome::SendFailed => "SEND FAILED".red().bold(),
        Outcome::Cancelled => "CANCELLED".yellow().bold(),
        Outcome::Pending => "PENDING".yellow().bold(),
    };
    let duplicate = if report.duplicate {
        " (already sent, not resent)".dimmed().to_string()
    } else {
        String::new()
    };

    println!("{}{}", outcome, duplicate);
    println!("Fingerprint: {}", report.fingerprint);
    println!("Decision:    {}", report.decision);
    if let Some(sequence) = report.sequence() {
        println!("Ledger:      entry {}", sequence);
    }
    if let Some(receipt) = &report.receipt {
        println!("Message:     {}", receipt.message_id);
    }
    if let Some(detail) = &report.detail {
        println!("Detail:      {}", detail.dimmed());
    }
    if !report.verdicts.is_empty() {
        println!("\nVerdicts:");
        for v in &report.verdicts {
            let mark = match v.verdict {
                VerdictKind::Pass => "✓".green(),
                VerdictKind::Warn => "⚠".yellow(),
                VerdictKind::Fail => "✗".red(),
            };
            print!("  {} {}@{}", mark, v.validator_id, v.version);
            if let Some(detail) = &v.detail {
                print!(" - {}", detail.dimmed());
            }
            println!();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_outcome() {
        assert_eq!(exit_code(Outcome::Sent), 0);
        assert_eq!(exit_code(Outcome::Blocked), 2);
        assert_eq!(exit_code(Outcome::SendFailed), 3);
        assert_eq!(exit_code(Outcome::Cancelled), 4);
    }
}
