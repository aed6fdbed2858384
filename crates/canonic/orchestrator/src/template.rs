use std::path::{Path, PathBuf};

use async_trait::async_trait;
use canonic_types::TemplateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subject used when a template has no `Subject:` line.
pub const DEFAULT_SUBJECT: &str = "CANONIC";

const SUBJECT_PREFIX: &str = "Subject:";
const TEMPLATE_EXTENSION: &str = "md";

/// A loaded template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub subject: String,
    pub body: String,
    /// BLAKE3 hex digest of the raw template file.
    pub version: String,
}

impl Template {
    /// Parse raw template text.
    ///
    /// A first line of the form `Subject: ...` sets the subject and is
    /// stripped from the body, along with one blank separator line.
    pub fn parse(id: TemplateId, raw: &str) -> Self {
        let version = blake3::hash(raw.as_bytes()).to_hex().to_string();
        let (first, rest) = match raw.split_once('\n') {
            Some((first, rest)) => (first, rest),
            None => (raw, ""),
        };

        match first.trim_end_matches('\r').strip_prefix(SUBJECT_PREFIX) {
            Some(subject) => {
                let body = rest
                    .strip_prefix("\r\n")
                    .or_else(|| rest.strip_prefix('\n'))
                    .unwrap_or(rest);
                let subject = subject.trim();
                Self {
                    id,
                    subject: if subject.is_empty() {
                        DEFAULT_SUBJECT.to_string()
                    } else {
                        subject.to_string()
                    },
                    body: body.to_string(),
                    version,
                }
            }
            None => Self {
                id,
                subject: DEFAULT_SUBJECT.to_string(),
                body: raw.to_string(),
                version,
            },
        }
    }
}

/// Listing entry for `templates`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub subject: String,
    pub version: String,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(TemplateId),

    #[error("invalid template id: {0}")]
    InvalidId(String),

    #[error("template I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn load(&self, id: &TemplateId) -> Result<Template, TemplateError>;

    async fn list(&self) -> Result<Vec<TemplateSummary>, TemplateError>;
}

/// Templates stored as `<dir>/<id>.md`.
pub struct FsTemplateStore {
    dir: PathBuf,
}

impl FsTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &TemplateId) -> Result<PathBuf, TemplateError> {
        let name = id.as_str();
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !safe {
            return Err(TemplateError::InvalidId(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.{TEMPLATE_EXTENSION}")))
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn load(&self, id: &TemplateId) -> Result<Template, TemplateError> {
        let path = self.path_for(id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Template::parse(id.clone(), &raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TemplateError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<TemplateSummary>, TemplateError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = tokio::fs::read_to_string(&path).await?;
            let template = Template::parse(TemplateId::new(stem), &raw);
            summaries.push(TemplateSummary {
                id: template.id,
                subject: template.subject,
                version: template.version,
            });
        }
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(summaries)
    }
}
