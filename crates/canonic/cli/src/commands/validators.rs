//! `validators`: registered validator metadata

use canonic_types::ValidatorDescriptor;
use tabled::Tabled;

use super::Context;
use crate::error::CliResult;
use crate::output::print_list;
use crate::runtime::load_registry;

#[derive(Tabled)]
struct ValidatorRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "TRIGGER")]
    trigger: String,
    #[tabled(rename = "PRIORITY")]
    priority: u32,
    #[tabled(rename = "SIGNER")]
    signer: String,
    #[tabled(rename = "CONTENT")]
    content: String,
}

impl From<&ValidatorDescriptor> for ValidatorRow {
    fn from(d: &ValidatorDescriptor) -> Self {
        Self {
            id: d.id.to_string(),
            version: d.version.to_string(),
            trigger: d.trigger.to_string(),
            priority: d.priority,
            signer: short(&d.signer),
            content: short(&d.content_hash),
        }
    }
}

fn short(hex: &str) -> String {
    hex.chars().take(12).collect()
}

pub fn execute(ctx: &Context) -> CliResult<()> {
    let loaded = load_registry(&ctx.config, &ctx.paths)?;
    let descriptors = loaded.registry.descriptors();
    print_list(&descriptors, ctx.format, |d| ValidatorRow::from(d))
}
