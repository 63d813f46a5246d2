//! API error handling.
//!
//! Every subsystem error is classified through [`ErrorKind`] and rendered as
//! a JSON `{code, message, details?}` body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::connectors::fhir::FhirError;
use crate::credentials::CredentialError;
use crate::error::Error;
use crate::sync::{ErrorKind, SyncError};
use crate::vault::VaultError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// 422 Unprocessable Entity.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// 423 Locked: unlock the vault and retry.
    pub fn vault_locked() -> Self {
        Self::new(StatusCode::LOCKED, "VAULT_LOCKED", VaultError::Locked.to_string())
    }

    /// Map a classified failure to a response.
    ///
    /// Internal failures are logged and replaced with a generic message so
    /// database or crypto details never reach the client.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let (status, code) = match kind {
            ErrorKind::Configuration => (StatusCode::SERVICE_UNAVAILABLE, "CONFIGURATION_ERROR"),
            ErrorKind::Authentication => (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED"),
            ErrorKind::StateMismatch => (StatusCode::BAD_REQUEST, "STATE_MISMATCH"),
            ErrorKind::AuthorizationExpired => (StatusCode::BAD_REQUEST, "AUTHORIZATION_EXPIRED"),
            ErrorKind::ReauthorizationRequired => {
                (StatusCode::UNAUTHORIZED, "REAUTHORIZATION_REQUIRED")
            }
            ErrorKind::TransientNetwork => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            ErrorKind::Internal => {
                tracing::error!(error = %message, "Internal error");
                return Self::internal("An unexpected error occurred");
            }
        };
        Self::new(status, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} with id '{}' not found", entity_type, id))
            }
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::DatabaseSqlx(e) => {
                tracing::error!("Database error: {}", e);
                ApiError::internal("Database error occurred")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Locked => ApiError::vault_locked(),
            VaultError::NotInitialized => {
                ApiError::new(StatusCode::CONFLICT, "VAULT_NOT_INITIALIZED", err.to_string())
            }
            VaultError::AlreadyInitialized => ApiError::conflict(err.to_string()),
            VaultError::WeakPassword { .. } => ApiError::validation(err.to_string()),
            VaultError::InvalidCredential => ApiError::unauthorized(err.to_string()),
            _ => ApiError::from_kind(ErrorKind::Internal, err.to_string()),
        }
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Vault(e) => e.into(),
            CredentialError::NotFound(id) => {
                ApiError::not_found(format!("Credential with id '{}' not found", id))
            }
            CredentialError::UnsupportedPortalType(_) | CredentialError::Validation(_) => {
                ApiError::validation(err.to_string())
            }
            CredentialError::Database(_) | CredentialError::Application(_) => {
                ApiError::from_kind(ErrorKind::Internal, err.to_string())
            }
        }
    }
}

impl From<FhirError> for ApiError {
    fn from(err: FhirError) -> Self {
        match err {
            FhirError::Vault(e) => e.into(),
            _ => ApiError::from_kind(err.kind(), err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Vault(e) => e.into(),
            SyncError::Fhir(e) => e.into(),
            SyncError::UnsupportedPortalType(_) => ApiError::validation(err.to_string()),
            _ => ApiError::from_kind(err.kind(), err.to_string()),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::browser::BrowserError;

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::not_found("Credential not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Credential not found");
    }

    #[test]
    fn test_from_domain_error() {
        let api_err: ApiError = Error::not_found("Credential", "123").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert!(api_err.message.contains("123"));
    }

    #[test]
    fn test_vault_errors() {
        let locked: ApiError = SyncError::Vault(VaultError::Locked).into();
        assert_eq!(locked.status, StatusCode::LOCKED);
        assert_eq!(locked.code, "VAULT_LOCKED");

        let wrong: ApiError = VaultError::InvalidCredential.into();
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

        let weak: ApiError = VaultError::WeakPassword { min: 8 }.into();
        assert_eq!(weak.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_sync_error_kinds() {
        let running: ApiError = SyncError::AlreadyRunning("c1".into()).into();
        assert_eq!(running.status, StatusCode::CONFLICT);

        let reauth: ApiError = SyncError::Fhir(FhirError::ReauthorizationRequired(
            "invalid_grant".into(),
        ))
        .into();
        assert_eq!(reauth.code, "REAUTHORIZATION_REQUIRED");

        let login: ApiError = SyncError::Browser(BrowserError::LoginFailed).into();
        assert_eq!(login.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err: ApiError = SyncError::Application("key material at 0xdead".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("0xdead"));
    }

    #[test]
    fn test_oauth_state_errors() {
        let mismatch: ApiError = FhirError::StateMismatch.into();
        assert_eq!(mismatch.code, "STATE_MISMATCH");
        let expired: ApiError = FhirError::AuthorizationExpired.into();
        assert_eq!(expired.code, "AUTHORIZATION_EXPIRED");
    }
}
