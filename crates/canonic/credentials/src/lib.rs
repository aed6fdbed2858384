//! Credential gate.
//!
//! Mediates every access to the secrets an action needs. Access is itself a
//! governed operation: [`CredentialGate::authorize`] runs the
//! `on-credential-access` validators and only a permitting decision mints a
//! single-use [`AccessGrant`], which [`CredentialGate::acquire`] consumes.

pub mod credential;
pub mod error;
pub mod gate;
pub mod provider;

pub use credential::{AccessGrant, Credential};
pub use error::{CredentialError, ProviderError};
pub use gate::{CredentialConfig, CredentialGate};
pub use provider::{IssuedToken, StaticTokenProvider, TokenProvider};
