//! Browser automation errors.

use thiserror::Error;

use crate::sync::ErrorKind;

#[derive(Debug, Error)]
pub enum BrowserError {
    /// The driver process or browser session could not be started.
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// WebDriver returned an error response.
    #[error("WebDriver error ({error}): {message}")]
    Driver { error: String, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Could not detect login form on {0}")]
    LoginFormNotDetected(String),

    #[error("Login failed. Check credentials or portal may have changed.")]
    LoginFailed,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application error: {0}")]
    Application(String),
}

impl BrowserError {
    pub fn timeout(what: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Driver { error, .. } => error == "timeout" || error == "script timeout",
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Launch(_) => ErrorKind::Configuration,
            Self::LoginFailed => ErrorKind::Authentication,
            Self::Network(_) => ErrorKind::TransientNetwork,
            e if e.is_timeout() => ErrorKind::TransientNetwork,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<crate::Error> for BrowserError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Io(e) => BrowserError::Io(e),
            crate::Error::Serialization(e) => BrowserError::Json(e),
            _ => BrowserError::Application(err.to_string()),
        }
    }
}
