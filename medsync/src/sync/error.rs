//! Sync error taxonomy.

use serde::Serialize;
use thiserror::Error;

use crate::connectors::browser::BrowserError;
use crate::connectors::fhir::FhirError;
use crate::credentials::CredentialError;
use crate::vault::VaultError;

/// Coarse classification of sync failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing configuration or locked vault.
    Configuration,
    /// Bad portal credentials or failed login.
    Authentication,
    /// OAuth callback with a state this server did not issue.
    StateMismatch,
    /// OAuth callback after the state's TTL.
    AuthorizationExpired,
    /// Refresh token rejected; the user must authorize again.
    ReauthorizationRequired,
    /// Timeouts and connection failures.
    TransientNetwork,
    NotFound,
    /// A sync for the same credential is already in flight.
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Unsupported portal type: {0}")]
    UnsupportedPortalType(String),

    #[error("A sync is already running for credential {0}")]
    AlreadyRunning(String),

    #[error(transparent)]
    Fhir(#[from] FhirError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Application error: {0}")]
    Application(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vault(e) => vault_kind(e),
            Self::CredentialNotFound(_) => ErrorKind::NotFound,
            Self::UnsupportedPortalType(_) => ErrorKind::Configuration,
            Self::AlreadyRunning(_) => ErrorKind::Conflict,
            Self::Fhir(e) => e.kind(),
            Self::Browser(e) => e.kind(),
            Self::Database(_) | Self::Application(_) => ErrorKind::Internal,
        }
    }
}

pub(crate) fn vault_kind(err: &VaultError) -> ErrorKind {
    match err {
        VaultError::Locked | VaultError::NotInitialized => ErrorKind::Configuration,
        VaultError::InvalidCredential => ErrorKind::Authentication,
        _ => ErrorKind::Internal,
    }
}

impl From<crate::Error> for SyncError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::DatabaseSqlx(e) => SyncError::Database(e),
            crate::Error::NotFound { id, .. } => SyncError::CredentialNotFound(id),
            _ => SyncError::Application(err.to_string()),
        }
    }
}

impl From<CredentialError> for SyncError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Vault(e) => SyncError::Vault(e),
            CredentialError::NotFound(id) => SyncError::CredentialNotFound(id),
            CredentialError::UnsupportedPortalType(t) => SyncError::UnsupportedPortalType(t),
            CredentialError::Database(e) => SyncError::Database(e),
            CredentialError::Validation(msg) | CredentialError::Application(msg) => {
                SyncError::Application(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            SyncError::Vault(VaultError::Locked).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SyncError::AlreadyRunning("c".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SyncError::CredentialNotFound("c".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SyncError::Fhir(FhirError::ReauthorizationRequired("revoked".into())).kind(),
            ErrorKind::ReauthorizationRequired
        );
        assert_eq!(
            SyncError::Browser(BrowserError::LoginFailed).kind(),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn test_from_credential_error() {
        let err: SyncError = CredentialError::UnsupportedPortalType("myspace".into()).into();
        assert!(matches!(err, SyncError::UnsupportedPortalType(t) if t == "myspace"));
    }
}
