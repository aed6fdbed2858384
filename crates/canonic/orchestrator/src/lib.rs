//! Action orchestration.
//!
//! Drives one send attempt through
//! `Built → Validating → {Blocked | Validated} → Sending → {Sent | SendFailed}
//! → Logging → Logged`, with `Cancelled` reachable before `Sending`. Every path
//! ends in a ledger entry.
//!
//! The transport and template store are collaborators behind traits;
//! [`OutboxTransport`] and [`FsTemplateStore`] are file-backed implementations.

pub mod error;
pub mod mocks;
pub mod orchestrator;
pub mod outbox;
pub mod state;
pub mod template;
pub mod transport;

pub use error::OrchestratorError;
pub use orchestrator::{ActionOrchestrator, ActionReport, OrchestratorConfig, SendRequest};
pub use outbox::OutboxTransport;
pub use state::{ActionState, StateMachine};
pub use template::{FsTemplateStore, Template, TemplateError, TemplateStore, TemplateSummary, DEFAULT_SUBJECT};
pub use transport::{MailTransport, TransportError};
