use async_trait::async_trait;
use canonic_types::{ActionContext, Verdict};
use thiserror::Error;

/// An opaque policy check.
///
/// Implementations must not mutate the context and should be independent of
/// each other; the runner may execute them concurrently.
#[async_trait]
pub trait Validator: Send + Sync {
    /// The id this capability was built for; must match its descriptor.
    fn id(&self) -> &str;

    /// Evaluate the action.
    async fn check(&self, context: &ActionContext) -> Result<Verdict, ValidatorFault>;
}

/// A validator could not produce a verdict.
///
/// The runner turns any fault into a `Fail` verdict; it never aborts a run.
#[derive(Debug, Error)]
pub enum ValidatorFault {
    #[error("validator misconfigured: {0}")]
    Misconfigured(String),

    #[error("validator internal error: {0}")]
    Internal(String),
}
