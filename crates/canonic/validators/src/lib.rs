//! Built-in validators.
//!
//! Each validator is configured by the JSON payload of its signed bundle. The
//! [`catalog`] maps a descriptor id to the constructor that parses that
//! payload, so a directory of manifests can be turned into registered
//! validators without the registry knowing what any of them do.

pub mod allowlist;
pub mod audit;
pub mod catalog;
pub mod limits;

pub use allowlist::{InitiatorAllowlist, RecipientAllowlist, TemplateSource};
pub use audit::EmailAudit;
pub use catalog::{build_validator, bundle_from_manifest, load_dir, CatalogError, BUILTIN_IDS};
pub use limits::{RateLimit, RecipientLimit};
