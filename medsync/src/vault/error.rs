//! Vault error types.

use thiserror::Error;

/// Errors raised by the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No key is held; unlock first.
    #[error("Vault is locked")]
    Locked,

    #[error("Vault has not been set up")]
    NotInitialized,

    #[error("Vault is already set up")]
    AlreadyInitialized,

    #[error("Master password must be at least {min} characters")]
    WeakPassword { min: usize },

    /// Master password did not match the verification hash.
    #[error("Invalid master password")]
    InvalidCredential,

    /// Malformed `iv:authTag:ciphertext` value, or the auth tag did not verify.
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Application error: {0}")]
    Application(String),
}

impl VaultError {
    /// Errors the caller fixes by unlocking or setting up the vault.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Locked | Self::NotInitialized)
    }
}

impl From<crate::Error> for VaultError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::DatabaseSqlx(e) => VaultError::Database(e),
            _ => VaultError::Application(err.to_string()),
        }
    }
}
