//! Validator registry: loads, verifies and version-locks opaque policy checks.
//!
//! A validator arrives as a [`ValidatorBundle`]: a signed [`ValidatorDescriptor`],
//! the payload the signature commits to, and the executable capability built
//! from that payload. The registry admits a bundle only when
//!
//! - the signer is in the [`TrustStore`] and the signature verifies,
//! - the payload hashes to the declared content hash,
//! - the version does not silently roll back an active one.
//!
//! After admission the registry branches only on descriptor metadata.
//!
//! [`ValidatorDescriptor`]: canonic_types::ValidatorDescriptor

pub mod bundle;
pub mod error;
pub mod mocks;
pub mod registry;
pub mod signing;
pub mod trust;
pub mod validator;

pub use bundle::{BundleManifest, ValidatorBundle};
pub use error::{RegistrationError, TrustError};
pub use registry::{LoadReport, RegisterOptions, RegistrationOutcome, ResolvedValidator, ValidatorRegistry};
pub use signing::{content_hash, generate_signing_key, sign_descriptor, verify, verify_signature};
pub use trust::TrustStore;
pub use validator::{Validator, ValidatorFault};
