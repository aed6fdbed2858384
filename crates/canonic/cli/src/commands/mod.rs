//! Command implementations

pub mod bundle;
pub mod ledger;
pub mod logout;
pub mod reconcile;
pub mod submit;
pub mod templates;
pub mod validators;

use crate::config::{CliConfig, Paths};
use crate::output::OutputFormat;

/// Shared state handed to every command.
pub struct Context {
    pub config: CliConfig,
    pub paths: Paths,
    pub format: OutputFormat,
}
