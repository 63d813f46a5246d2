//! W3C WebDriver implementation of the browser capability.
//!
//! Each launch either spawns `chromedriver` on a free local port or attaches
//! to `WEBDRIVER_URL`, then opens one Chrome session. Closing the page ends
//! the session and kills the spawned driver; the child is also killed if the
//! page is dropped without closing.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use super::driver::NAVIGATION_TIMEOUT;
use super::{BrowserError, BrowserLauncher, BrowserPage, Locator, SessionCookie, SessionState, StorageEntry};
use crate::config::BrowserConfig;
use crate::connectors::http::build_http_client;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ENTER_KEY: &str = "\u{E007}";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const DRIVER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

/// Shared element lookup: CSS selector plus optional case-insensitive text regex.
const FIND_FN: &str = r#"
const find = (css, pattern) => {
  const re = pattern === null ? null : new RegExp(pattern, 'i');
  return Array.from(document.querySelectorAll(css))
    .filter(el => re === null || re.test((el.innerText || el.textContent || '').trim()));
};
const text = el => (el.innerText || el.textContent || '').trim();
"#;

fn script(body: &str) -> String {
    format!("{FIND_FN}{body}")
}

fn locator_args(locator: &Locator) -> Vec<Value> {
    match locator {
        Locator::Css(css) => vec![json!(css), Value::Null],
        Locator::Text { css, pattern } => vec![json!(css), json!(pattern)],
    }
}

fn driver_error(value: &Value) -> BrowserError {
    BrowserError::Driver {
        error: value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
        message: value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

/// Element ids from an `execute/sync` result holding element references.
fn element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Send one WebDriver command and unwrap its `value`.
async fn send_command(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method.clone(), url);
    if method == Method::POST {
        request = request.json(&body.unwrap_or_else(|| json!({})));
    }
    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(driver_error(&value));
    }
    Ok(value)
}

/// Spawn chromedriver on a free port and wait until it reports ready.
async fn spawn_driver(
    client: &reqwest::Client,
    path: &Path,
) -> Result<(String, Child), BrowserError> {
    let port = {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        listener.local_addr()?.port()
    };

    let mut command = Command::new(path);
    command
        .arg(format!("--port={port}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let child = command.spawn().map_err(|e| {
        BrowserError::Launch(format!("failed to spawn {}: {e}", path.display()))
    })?;

    let url = format!("http://127.0.0.1:{port}");
    let deadline = tokio::time::Instant::now() + DRIVER_STARTUP_TIMEOUT;
    loop {
        let ready = send_command(client, Method::GET, &format!("{url}/status"), None)
            .await
            .ok()
            .and_then(|v| v.get("ready").and_then(Value::as_bool))
            .unwrap_or(false);
        if ready {
            debug!(port, "chromedriver ready");
            return Ok((url, child));
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrowserError::Launch(format!(
                "chromedriver did not become ready within {}s",
                DRIVER_STARTUP_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(DRIVER_POLL_INTERVAL).await;
    }
}

fn capabilities(headless: bool) -> Value {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--window-size=1280,900".to_string(),
        format!("--user-agent={USER_AGENT}"),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "pageLoadStrategy": "normal",
                "timeouts": {
                    "pageLoad": NAVIGATION_TIMEOUT.as_millis() as u64,
                    "script": NAVIGATION_TIMEOUT.as_millis() as u64,
                },
                "goog:chromeOptions": { "args": args },
            }
        }
    })
}

pub struct WebDriverLauncher {
    config: BrowserConfig,
    client: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            client: build_http_client(REQUEST_TIMEOUT),
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    #[instrument(skip(self))]
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let (server_url, driver) = match self.config.webdriver_url.as_deref() {
            Some(url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let (url, child) = spawn_driver(&self.client, &self.config.chromedriver_path).await?;
                (url, Some(child))
            }
        };

        // On failure the spawned driver is dropped and killed.
        let session = send_command(
            &self.client,
            Method::POST,
            &format!("{server_url}/session"),
            Some(capabilities(self.config.headless)),
        )
        .await
        .map_err(|e| BrowserError::Launch(format!("failed to create session: {e}")))?;

        let session_id = session
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Launch("session response has no sessionId".into()))?;

        info!(session_id, headless = self.config.headless, "Browser session started");
        Ok(Box::new(WebDriverPage {
            client: self.client.clone(),
            session_url: format!("{server_url}/session/{session_id}"),
            driver: Mutex::new(driver),
        }))
    }
}

pub struct WebDriverPage {
    client: reqwest::Client,
    session_url: String,
    driver: Mutex<Option<Child>>,
}

impl WebDriverPage {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        send_command(
            &self.client,
            method,
            &format!("{}{}", self.session_url, path),
            body,
        )
        .await
    }

    async fn first_element(&self, locator: &Locator) -> Result<String, BrowserError> {
        let found = self
            .evaluate(&script("return find(arguments[0], arguments[1]);"), locator_args(locator))
            .await?;
        element_ids(&found)
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError> {
        let value = self
            .evaluate(
                &script("return find(arguments[0], arguments[1]).length;"),
                locator_args(locator),
            )
            .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        let id = self.first_element(locator).await?;
        self.command(Method::POST, &format!("/element/{id}/clear"), None)
            .await?;
        self.command(
            Method::POST,
            &format!("/element/{id}/value"),
            Some(json!({ "text": value })),
        )
        .await
        .map(|_| ())
    }

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        let id = self.first_element(locator).await?;
        self.command(Method::POST, &format!("/element/{id}/click"), None)
            .await
            .map(|_| ())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        let id = self.first_element(locator).await?;
        self.command(
            Method::POST,
            &format!("/element/{id}/value"),
            Some(json!({ "text": ENTER_KEY })),
        )
        .await
        .map(|_| ())
    }

    async fn texts(&self, locator: &Locator) -> Result<Vec<String>, BrowserError> {
        let value = self
            .evaluate(
                &script("return find(arguments[0], arguments[1]).map(text);"),
                locator_args(locator),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn attributes(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, BrowserError> {
        let mut args = locator_args(locator);
        args.push(json!(name));
        let value = self
            .evaluate(
                &script("return find(arguments[0], arguments[1]).map(el => el.getAttribute(arguments[2]));"),
                args,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn table_rows(
        &self,
        row_css: &str,
        cell_css: &str,
    ) -> Result<Vec<Vec<String>>, BrowserError> {
        let value = self
            .evaluate(
                &script(
                    "return Array.from(document.querySelectorAll(arguments[0]))\
                     .map(row => Array.from(row.querySelectorAll(arguments[1])).map(text));",
                ),
                vec![json!(row_css), json!(cell_css)],
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn export_session_state(&self) -> Result<SessionState, BrowserError> {
        let cookies: Vec<SessionCookie> =
            serde_json::from_value(self.command(Method::GET, "/cookie", None).await?)?;
        let storage = self
            .evaluate(
                "return [location.origin, Object.keys(localStorage).map(k => [k, localStorage.getItem(k)])];",
                Vec::new(),
            )
            .await?;
        let (origin, entries): (String, Vec<(String, String)>) = serde_json::from_value(storage)?;

        Ok(SessionState {
            origin,
            cookies,
            local_storage: entries
                .into_iter()
                .map(|(name, value)| StorageEntry { name, value })
                .collect(),
        })
    }

    async fn restore_session_state(&self, state: &SessionState) -> Result<(), BrowserError> {
        // Cookies and storage can only be set on a document from the origin.
        self.goto(&state.origin).await?;

        for cookie in &state.cookies {
            if let Err(e) = self
                .command(Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
                .await
            {
                warn!(cookie = %cookie.name, error = %e, "Failed to restore cookie");
            }
        }

        let entries: Vec<(&str, &str)> = state
            .local_storage
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        self.evaluate(
            "for (const [k, v] of arguments[0]) { localStorage.setItem(k, v); }",
            vec![json!(entries)],
        )
        .await?;
        debug!(cookies = state.cookies.len(), "Restored browser session");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let ended = self.command(Method::DELETE, "", None).await.map(|_| ());

        let driver = self.driver.lock().take();
        if let Some(mut child) = driver
            && let Err(e) = child.kill().await
        {
            warn!(error = %e, "Failed to stop chromedriver");
        }
        ended
    }
}
