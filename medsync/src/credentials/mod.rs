//! Portal credential management.
//!
//! Stores portal logins encrypted with the vault key and hands decrypted
//! [`PortalCredential`]s to the sync orchestrator.

mod error;
mod service;
mod types;

pub use error::CredentialError;
pub use service::CredentialService;
pub use types::{ConnectorKind, CredentialSummary, NewCredential, PortalCredential, PortalType};
