//! FHIR connector errors.

use thiserror::Error;

use crate::sync::{ErrorKind, vault_kind};
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum FhirError {
    #[error("FHIR configuration error: {0}")]
    Configuration(String),

    /// No pending authorization matches the callback's state.
    #[error("Invalid state parameter")]
    StateMismatch,

    #[error("Authorization expired, please try again")]
    AuthorizationExpired,

    #[error("Not authorized: connect the FHIR account for credential {0} first")]
    NotAuthorized(String),

    /// The refresh grant was rejected; the user must authorize again.
    #[error("Re-authorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("Token request failed ({status}): {body}")]
    TokenExchange { status: u16, body: String },

    #[error("FHIR API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Application error: {0}")]
    Application(String),
}

impl FhirError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::StateMismatch => ErrorKind::StateMismatch,
            Self::AuthorizationExpired => ErrorKind::AuthorizationExpired,
            Self::NotAuthorized(_) | Self::TokenExchange { .. } => ErrorKind::Authentication,
            Self::ReauthorizationRequired(_) => ErrorKind::ReauthorizationRequired,
            Self::Api { status, .. } if *status == 401 => ErrorKind::ReauthorizationRequired,
            Self::Api { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::TransientNetwork
            }
            Self::Network(_) => ErrorKind::TransientNetwork,
            Self::Vault(e) => vault_kind(e),
            Self::Api { .. }
            | Self::Json(_)
            | Self::Pagination(_)
            | Self::Database(_)
            | Self::Application(_) => ErrorKind::Internal,
        }
    }
}

impl From<crate::Error> for FhirError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::DatabaseSqlx(e) => FhirError::Database(e),
            crate::Error::Serialization(e) => FhirError::Json(e),
            _ => FhirError::Application(err.to_string()),
        }
    }
}
