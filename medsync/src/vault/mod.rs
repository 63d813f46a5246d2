//! Credential vault.
//!
//! A master password unlocks an AES-256-GCM key that encrypts portal
//! secrets and OAuth tokens at rest. The key lives only in memory, behind a
//! [`VaultHandle`] shared by everything that needs it.

pub mod crypto;
mod error;
mod handle;
mod service;

pub use crypto::VaultKey;
pub use error::VaultError;
pub use handle::VaultHandle;
pub use service::{MIN_PASSWORD_LEN, VaultService, VaultStatus};
