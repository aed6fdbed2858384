//! CLI configuration

use std::path::PathBuf;

use canonic_credentials::CredentialConfig;
use canonic_ledger::{LedgerConfig, ReconcilerConfig};
use canonic_orchestrator::OrchestratorConfig;
use canonic_runner::RunnerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

const APP_DIR: &str = "canonic-mail";

/// Where the static send token comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Environment variable holding the token.
    pub env: String,
    /// Token written directly in the config file. The environment wins.
    pub value: Option<String>,
    pub ttl_secs: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            env: "CANONIC_MAIL_TOKEN".into(),
            value: None,
            ttl_secs: 3600,
        }
    }
}

impl TokenSettings {
    pub fn resolve(&self) -> Option<String> {
        std::env::var(&self.env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.value.clone())
    }
}

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Root for the ledger and outbox. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
    pub validators_dir: Option<PathBuf>,
    /// Hex Ed25519 verifying keys allowed to sign validator bundles.
    pub trusted_keys: Vec<String>,
    pub default_initiator: Option<String>,
    pub token: TokenSettings,
    pub runner: RunnerConfig,
    pub credentials: CredentialConfig,
    pub ledger: LedgerConfig,
    pub orchestrator: OrchestratorConfig,
    pub reconciler: ReconcilerConfig,
}

/// Resolved on-disk locations.
#[derive(Debug, Clone)]
pub struct Paths {
    pub ledger: PathBuf,
    pub outbox: PathBuf,
    pub templates: PathBuf,
    pub validators: PathBuf,
}

impl CliConfig {
    /// Load configuration from file. A missing file yields defaults.
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents).map_err(|e| CliError::Config(e.to_string()))
        } else {
            Ok(CliConfig::default())
        }
    }

    fn default_config_path() -> CliResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CliError::Config("Cannot find config directory".into()))?;
        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }

    /// Resolve paths, preferring `data_dir_override` over the config file.
    pub fn paths(&self, data_dir_override: Option<PathBuf>) -> CliResult<Paths> {
        let data_dir = match data_dir_override.or_else(|| self.data_dir.clone()) {
            Some(dir) => dir,
            None => dirs::data_dir()
                .ok_or_else(|| CliError::Config("Cannot find data directory".into()))?
                .join(APP_DIR),
        };

        Ok(Paths {
            ledger: data_dir.join("ledger"),
            outbox: data_dir.join("outbox"),
            templates: self
                .templates_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("templates")),
            validators: self
                .validators_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("validators")),
        })
    }

    /// Initiator recorded on submitted actions.
    pub fn initiator(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.default_initiator.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "cli".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = CliConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert!(config.trusted_keys.is_empty());
        assert_eq!(config.token.env, "CANONIC_MAIL_TOKEN");
        assert_eq!(config.orchestrator.max_send_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
trusted_keys = ["abcd"]
default_initiator = "ops@example.com"

[orchestrator]
max_send_attempts = 5

[ledger.backoff]
max_attempts = 2
"#,
        )
        .unwrap();

        let config = CliConfig::load(path.to_str()).unwrap();
        assert_eq!(config.trusted_keys, vec!["abcd".to_string()]);
        assert_eq!(config.orchestrator.max_send_attempts, 5);
        assert_eq!(config.orchestrator.send_timeout_ms, 10_000);
        assert_eq!(config.ledger.backoff.max_attempts, 2);
        assert_eq!(config.initiator(None), "ops@example.com");
        assert_eq!(config.initiator(Some("x".into())), "x");
    }

    #[test]
    fn data_dir_override_wins() {
        let config = CliConfig {
            data_dir: Some(PathBuf::from("/from/config")),
            templates_dir: Some(PathBuf::from("/tpl")),
            ..CliConfig::default()
        };
        let paths = config.paths(Some(PathBuf::from("/override"))).unwrap();
        assert_eq!(paths.ledger, PathBuf::from("/override/ledger"));
        assert_eq!(paths.outbox, PathBuf::from("/override/outbox"));
        assert_eq!(paths.templates, PathBuf::from("/tpl"));
        assert_eq!(paths.validators, PathBuf::from("/override/validators"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "trusted_keys = 7").unwrap();
        let err = CliConfig::load(path.to_str()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
