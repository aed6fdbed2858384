//! Ledger inspection commands

use canonic_types::LedgerEntry;
use clap::Subcommand;
use tabled::Tabled;

use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::{print_list, print_single, print_success};
use crate::runtime::{open_ledger, parse_fingerprint};

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// List committed entries
    List {
        /// First sequence to show
        #[arg(long, default_value_t = 1)]
        from: u64,

        /// Last sequence to show (defaults to the newest)
        #[arg(long)]
        to: Option<u64>,
    },

    /// Show the effective entry for a fingerprint
    Show {
        /// Fingerprint, as hex or `fp:<hex>`
        fingerprint: String,

        /// Also list every superseded entry
        #[arg(long)]
        history: bool,
    },

    /// Recompute the hash chain
    Verify,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "SEQ")]
    sequence: u64,
    #[tabled(rename = "TIME")]
    time: String,
    #[tabled(rename = "FINGERPRINT")]
    fingerprint: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "DECISION")]
    decision: String,
    #[tabled(rename = "SUPERSEDES")]
    supersedes: String,
    #[tabled(rename = "INITIATOR")]
    initiator: String,
}

impl From<&LedgerEntry> for EntryRow {
    fn from(e: &LedgerEntry) -> Self {
        Self {
            sequence: e.sequence,
            time: e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            fingerprint: e.fingerprint.short().to_string(),
            outcome: e.outcome.to_string(),
            decision: e.decision.to_string(),
            supersedes: e.supersedes.map(|s| s.to_string()).unwrap_or_default(),
            initiator: e.initiator.clone(),
        }
    }
}

pub async fn execute(command: LedgerCommands, ctx: &Context) -> CliResult<()> {
    let ledger = open_ledger(&ctx.config, &ctx.paths).await?;

    match command {
        LedgerCommands::List { from, to } => {
            let entries = ledger
                .read_range(from, to.unwrap_or(u64::MAX))
                .await?
                .collect_all()
                .await?;
            print_list(&entries, ctx.format, |e| EntryRow::from(e))
        }

        LedgerCommands::Show {
            fingerprint,
            history,
        } => {
            let fingerprint = parse_fingerprint(&fingerprint)?;
            let effective = ledger
                .find_by_fingerprint(&fingerprint)
                .await?
                .ok_or_else(|| CliError::NotFound(format!("no ledger entry for {fingerprint}")))?;

            if history {
                let entries: Vec<LedgerEntry> = ledger
                    .read_range(1, effective.sequence)
                    .await?
                    .collect_all()
                    .await?
                    .into_iter()
                    .filter(|e| e.fingerprint == fingerprint)
                    .collect();
                print_list(&entries, ctx.format, |e| EntryRow::from(e))
            } else {
                print_single(&effective, ctx.format)
            }
        }

        LedgerCommands::Verify => {
            let report = ledger.verify_chain().await?;
            match report.first_broken {
                None => {
                    print_success(&format!(
                        "Ledger chain intact: {} entries, head {}",
                        report.entries_checked,
                        &report.head[..report.head.len().min(12)]
                    ));
                    Ok(())
                }
                Some(sequence) => Err(CliError::ChainBroken { sequence }),
            }
        }
    }
}
