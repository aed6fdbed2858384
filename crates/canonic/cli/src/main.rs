//! canonic-mail - governed mail dispatch
//!
//! Every send passes signed, version-locked validators before any credential
//! is touched, and every attempt lands in an append-only, hash-chained ledger:
//! - Submit messages directly or from templates
//! - Inspect and verify the audit ledger
//! - Reconcile the ledger against the outbox after a crash
//! - Sign validator bundles

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod output;
mod runtime;

use commands::{bundle, ledger, logout, reconcile, submit, templates, validators, Context};
use config::CliConfig;
use error::CliResult;

#[derive(Parser)]
#[command(name = "canonic-mail")]
#[command(about = "Governed mail dispatch with an append-only audit ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "CANONIC_MAIL_CONFIG")]
    config: Option<String>,

    /// Directory holding the ledger and outbox
    #[arg(long, global = true, env = "CANONIC_MAIL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format (table, json, yaml)
    #[arg(short, long, global = true, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, send and log one message
    Submit(submit::SubmitArgs),

    /// Inspect the audit ledger
    Ledger {
        #[command(subcommand)]
        command: ledger::LedgerCommands,
    },

    /// List registered validators
    Validators,

    /// List available templates
    Templates,

    /// Reconcile the ledger with the outbox
    Reconcile,

    /// Revoke the cached send credential
    Logout,

    /// Validator bundle tooling
    Bundle {
        #[command(subcommand)]
        command: bundle::BundleCommands,
    },

    /// Generate a bundle signing key
    Keygen(bundle::KeygenArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let paths = config.paths(cli.data_dir)?;
    let ctx = Context {
        config,
        paths,
        format: cli.output,
    };

    match cli.command {
        Commands::Submit(args) => return submit::execute(args, &ctx).await,
        Commands::Ledger { command } => ledger::execute(command, &ctx).await?,
        Commands::Validators => validators::execute(&ctx)?,
        Commands::Templates => templates::execute(&ctx).await?,
        Commands::Reconcile => reconcile::execute(&ctx).await?,
        Commands::Logout => logout::execute(&ctx).await?,
        Commands::Bundle { command } => bundle::execute(command, &ctx)?,
        Commands::Keygen(args) => bundle::keygen(args)?,
    }
    Ok(ExitCode::SUCCESS)
}
