//! `templates`: list available templates

use canonic_orchestrator::{FsTemplateStore, TemplateStore, TemplateSummary};
use tabled::Tabled;

use super::Context;
use crate::error::CliResult;
use crate::output::print_list;

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "SUBJECT")]
    subject: String,
    #[tabled(rename = "VERSION")]
    version: String,
}

impl From<&TemplateSummary> for TemplateRow {
    fn from(t: &TemplateSummary) -> Self {
        Self {
            id: t.id.to_string(),
            subject: t.subject.clone(),
            version: t.version.chars().take(12).collect(),
        }
    }
}

pub async fn execute(ctx: &Context) -> CliResult<()> {
    let store = FsTemplateStore::new(&ctx.paths.templates);
    let templates = store.list().await?;
    print_list(&templates, ctx.format, |t| TemplateRow::from(t))
}
