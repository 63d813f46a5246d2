//! Credential management errors.

use thiserror::Error;

use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Credential not found: {0}")]
    NotFound(String),

    #[error("Unsupported portal type: {0}")]
    UnsupportedPortalType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Application error: {0}")]
    Application(String),
}

impl From<crate::Error> for CredentialError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::DatabaseSqlx(e) => CredentialError::Database(e),
            crate::Error::NotFound { id, .. } => CredentialError::NotFound(id),
            crate::Error::Validation(msg) => CredentialError::Validation(msg),
            _ => CredentialError::Application(err.to_string()),
        }
    }
}
