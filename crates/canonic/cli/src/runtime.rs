//! Wiring of library components from configuration.

use std::sync::Arc;

use canonic_credentials::{CredentialGate, StaticTokenProvider};
use canonic_ledger::{AuditLedger, FileLedgerStorage, StorageError};
use canonic_orchestrator::{ActionOrchestrator, FsTemplateStore, OutboxTransport};
use canonic_registry::{LoadReport, RegisterOptions, TrustStore, ValidatorRegistry};
use canonic_runner::ValidationRunner;
use tracing::{debug, warn};

use crate::config::{CliConfig, Paths};
use crate::error::{CliError, CliResult};
use crate::output::print_warning;

/// Registry loaded from the validators directory.
pub struct LoadedRegistry {
    pub registry: Arc<ValidatorRegistry>,
    pub report: LoadReport,
}

pub fn trust_store(config: &CliConfig) -> CliResult<TrustStore> {
    Ok(TrustStore::from_hex_keys(&config.trusted_keys)?)
}

/// Build the registry and register every bundle in the validators directory.
pub fn load_registry(config: &CliConfig, paths: &Paths) -> CliResult<LoadedRegistry> {
    let registry = Arc::new(ValidatorRegistry::new(trust_store(config)?));
    let report = if paths.validators.is_dir() {
        canonic_validators::load_dir(&registry, &paths.validators, RegisterOptions::default())?
    } else {
        debug!(dir = %paths.validators.display(), "No validators directory");
        LoadReport::default()
    };

    for (id, err) in &report.rejected {
        let label = id.as_ref().map(|i| i.as_str()).unwrap_or("<unreadable>");
        print_warning(&format!("validator bundle {label} rejected: {err}"));
    }
    Ok(LoadedRegistry { registry, report })
}

/// Open the ledger, waiting out a lock briefly held by another process.
pub async fn open_ledger(config: &CliConfig, paths: &Paths) -> CliResult<Arc<AuditLedger>> {
    let backoff = &config.ledger.backoff;
    let mut attempt = 1;
    let storage = loop {
        match FileLedgerStorage::open(&paths.ledger) {
            Ok(storage) => break storage,
            Err(err @ StorageError::Unavailable(_)) if attempt < backoff.max_attempts => {
                debug!(attempt, error = %err, "Ledger busy, waiting");
                tokio::time::sleep(backoff.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };
    let ledger = AuditLedger::open(Arc::new(storage), config.ledger.clone()).await?;
    Ok(Arc::new(ledger))
}

pub fn credential_gate(config: &CliConfig, runner: ValidationRunner) -> Arc<CredentialGate> {
    let token = config.token.resolve().unwrap_or_else(|| {
        warn!(env = %config.token.env, "No send token configured");
        String::new()
    });
    let provider = StaticTokenProvider::new(token, chrono::Duration::seconds(config.token.ttl_secs));
    Arc::new(CredentialGate::new(
        runner,
        Arc::new(provider),
        config.credentials.clone(),
    ))
}

/// Everything `submit` needs.
pub struct Runtime {
    pub orchestrator: ActionOrchestrator,
    pub ledger: Arc<AuditLedger>,
}

impl Runtime {
    pub async fn open(config: &CliConfig, paths: &Paths) -> CliResult<Self> {
        let loaded = load_registry(config, paths)?;
        let runner = ValidationRunner::new(loaded.registry, config.runner.clone());
        let credentials = credential_gate(config, runner.clone());
        let ledger = open_ledger(config, paths).await?;

        let orchestrator = ActionOrchestrator::new(
            runner,
            credentials,
            Arc::new(OutboxTransport::new(&paths.outbox)),
            Arc::new(FsTemplateStore::new(&paths.templates)),
            ledger.clone(),
            config.orchestrator.clone(),
        );
        Ok(Self {
            orchestrator,
            ledger,
        })
    }
}

/// Parse a fingerprint given as bare hex or in its `fp:` display form.
pub fn parse_fingerprint(raw: &str) -> CliResult<canonic_types::Fingerprint> {
    let hex = raw.trim().strip_prefix("fp:").unwrap_or(raw.trim());
    canonic_types::Fingerprint::parse(hex)
        .ok_or_else(|| CliError::InvalidInput(format!("not a fingerprint: {raw}")))
}
