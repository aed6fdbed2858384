//! CLI error types

use canonic_credentials::CredentialError;
use canonic_ledger::{LedgerError, StorageError};
use canonic_orchestrator::{OrchestratorError, TemplateError};
use canonic_registry::{RegistrationError, TrustError};
use thiserror::Error;

/// CLI error type
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger chain broken at entry {sequence}")]
    ChainBroken { sequence: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Trust store error: {0}")]
    Trust(#[from] TrustError),

    #[error("Bundle error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Ledger storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
