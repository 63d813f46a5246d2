//! Browser capability used by the portal connector.
//!
//! The connector only needs a handful of page operations. Keeping them behind
//! [`BrowserPage`] lets the login state machine and scrapers run against an
//! in-process fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BrowserError;

/// Per-operation timeouts.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
pub const SELECTOR_TIMEOUT: Duration = Duration::from_secs(8);

pub const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How to find elements on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Plain CSS selector.
    Css(String),
    /// Elements matching `css` whose text matches `pattern`
    /// (case-insensitive regex).
    Text { css: String, pattern: String },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn text(css: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Text {
            css: css.into(),
            pattern: pattern.into(),
        }
    }

    /// Any element whose text matches `pattern`.
    pub fn any_text(pattern: impl Into<String>) -> Self {
        Self::text("body *", pattern)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Css(css) => f.write_str(css),
            Self::Text { css, pattern } => write!(f, "{css} /{pattern}/i"),
        }
    }
}

/// Serialized cookies and local storage of an authenticated session.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Origin the local storage entries belong to.
    pub origin: String,
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("origin", &self.origin)
            .field("cookies", &self.cookies.len())
            .field("local_storage", &self.local_storage.len())
            .finish()
    }
}

/// W3C WebDriver cookie object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    /// Seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// One open browser tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the document to load.
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Number of elements matching `locator`.
    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError>;

    /// Clear the first matching input and type `value`.
    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), BrowserError>;

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Press Enter in the first matching element.
    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError>;

    /// Text content of every matching element, trimmed.
    async fn texts(&self, locator: &Locator) -> Result<Vec<String>, BrowserError>;

    /// Attribute `name` of every matching element.
    async fn attributes(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, BrowserError>;

    /// Cell texts of every row matching `row_css`, split by `cell_css`.
    async fn table_rows(
        &self,
        row_css: &str,
        cell_css: &str,
    ) -> Result<Vec<Vec<String>>, BrowserError>;

    /// Run a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError>;

    async fn export_session_state(&self) -> Result<SessionState, BrowserError>;

    /// Load cookies and local storage for `state.origin`.
    async fn restore_session_state(&self, state: &SessionState) -> Result<(), BrowserError>;

    /// End the session and release the browser.
    async fn close(&self) -> Result<(), BrowserError>;

    /// Poll until at least one element matches.
    async fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(locator).await? > 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::timeout(locator.to_string(), timeout));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    /// Poll `document.readyState` until the page reports `complete`.
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self
                .evaluate("return document.readyState;", Vec::new())
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::timeout("page load", timeout));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }
}

/// Starts a fresh browser per sync.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;
}

/// Swallow a timeout where continuing is safe; other errors propagate.
pub fn soft_timeout(result: Result<(), BrowserError>, what: &str) -> Result<(), BrowserError> {
    match result {
        Err(e) if e.is_timeout() => {
            tracing::debug!(what, "Timed out, continuing");
            Ok(())
        }
        other => other,
    }
}
