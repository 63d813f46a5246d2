//! In-process fake browser for tests.
//!
//! A [`FakePage`] is a small site map: URLs map to screens of elements, and
//! clicks or Enter presses navigate between them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::RegexBuilder;
use serde_json::Value;

use super::{BrowserError, BrowserLauncher, BrowserPage, Locator, SessionState};

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    selectors: Vec<String>,
    text: String,
    attrs: HashMap<String, String>,
}

impl FakeElement {
    /// An element matched by each of `selectors`.
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    fn matches(&self, locator: &Locator) -> bool {
        match locator {
            Locator::Css(css) => self.selectors.iter().any(|s| s == css),
            Locator::Text { css, pattern } => {
                let css_ok = css == "body *"
                    || css
                        .split(',')
                        .map(str::trim)
                        .any(|c| self.selectors.iter().any(|s| s == c));
                css_ok
                    && RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .is_ok_and(|re| re.is_match(&self.text))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeScreen {
    elements: Vec<FakeElement>,
    rows: Vec<Vec<String>>,
    broken_table: bool,
}

impl FakeScreen {
    pub fn new(elements: Vec<FakeElement>) -> Self {
        Self {
            elements,
            rows: Vec::new(),
            broken_table: false,
        }
    }

    /// Reading the results table fails with a driver error.
    pub fn with_broken_table(mut self) -> Self {
        self.broken_table = true;
        self
    }

    pub fn with_rows(mut self, rows: &[&[&str]]) -> Self {
        self.rows = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        self
    }
}

#[derive(Default)]
struct FakeState {
    url: String,
    screens: HashMap<String, FakeScreen>,
    /// `goto` target → landing URL without a restored session.
    redirects: HashMap<String, String>,
    /// `goto` target → landing URL with a restored session.
    session_redirects: HashMap<String, String>,
    clicks: HashMap<Locator, String>,
    /// Clicks that navigate only after a delay, like a script redirect.
    delayed_clicks: HashMap<Locator, (String, Duration)>,
    enter: Option<String>,
    session: Option<SessionState>,
    exported: SessionState,
    filled: Vec<(Locator, String)>,
    clicked: Vec<Locator>,
    visited: Vec<String>,
    closed: bool,
    fail_restore: bool,
    fail_export: bool,
}

impl FakeState {
    fn screen(&self) -> Option<&FakeScreen> {
        self.screens.get(&self.url)
    }

    fn matching(&self, locator: &Locator) -> Vec<&FakeElement> {
        self.screen()
            .map(|s| s.elements.iter().filter(|e| e.matches(locator)).collect())
            .unwrap_or_default()
    }

    fn navigate(&mut self, url: String) {
        self.visited.push(url.clone());
        self.url = url;
    }
}

#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn new(url: &str, screen: FakeScreen) -> Self {
        let page = Self::default();
        page.state.lock().url = url.to_string();
        page.add_screen(url, screen);
        page
    }

    pub fn add_screen(&self, url: &str, screen: FakeScreen) {
        self.state.lock().screens.insert(url.to_string(), screen);
    }

    pub fn redirect(&self, from: &str, to: &str) {
        self.state
            .lock()
            .redirects
            .insert(from.to_string(), to.to_string());
    }

    pub fn redirect_with_session(&self, from: &str, to: &str) {
        self.state
            .lock()
            .session_redirects
            .insert(from.to_string(), to.to_string());
    }

    pub fn on_click(&self, locator: Locator, to: &str) {
        self.state.lock().clicks.insert(locator, to.to_string());
    }

    pub fn on_click_delayed(&self, locator: Locator, to: &str, delay: Duration) {
        self.state
            .lock()
            .delayed_clicks
            .insert(locator, (to.to_string(), delay));
    }

    pub fn on_enter(&self, to: &str) {
        self.state.lock().enter = Some(to.to_string());
    }

    pub fn set_exported_session(&self, session: SessionState) {
        self.state.lock().exported = session;
    }

    pub fn fail_restore(&self) {
        self.state.lock().fail_restore = true;
    }

    pub fn fail_export(&self) {
        self.state.lock().fail_export = true;
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn filled(&self) -> Vec<(Locator, String)> {
        self.state.lock().filled.clone()
    }

    pub fn clicked(&self) -> Vec<Locator> {
        self.state.lock().clicked.clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().visited.clone()
    }

    pub fn restored_session(&self) -> Option<SessionState> {
        self.state.lock().session.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn require(&self, locator: &Locator) -> Result<(), BrowserError> {
        let state = self.state.lock();
        if state.closed {
            return Err(BrowserError::Application("page is closed".into()));
        }
        if state.matching(locator).is_empty() {
            return Err(BrowserError::ElementNotFound(locator.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        let landing = if state.session.is_some() {
            state.session_redirects.get(url)
        } else {
            state.redirects.get(url)
        }
        .cloned()
        .unwrap_or_else(|| url.to_string());
        state.navigate(landing);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url())
    }

    async fn count(&self, locator: &Locator) -> Result<usize, BrowserError> {
        Ok(self.state.lock().matching(locator).len())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), BrowserError> {
        self.require(locator)?;
        self.state
            .lock()
            .filled
            .push((locator.clone(), value.to_string()));
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.require(locator)?;
        let mut state = self.state.lock();
        state.clicked.push(locator.clone());
        if let Some(to) = state.clicks.get(locator).cloned() {
            state.navigate(to);
        } else if let Some((to, delay)) = state.delayed_clicks.get(locator).cloned() {
            let shared = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.lock().navigate(to);
            });
        }
        Ok(())
    }

    async fn press_enter(&self, locator: &Locator) -> Result<(), BrowserError> {
        self.require(locator)?;
        let mut state = self.state.lock();
        if let Some(to) = state.enter.clone() {
            state.navigate(to);
        }
        Ok(())
    }

    async fn texts(&self, locator: &Locator) -> Result<Vec<String>, BrowserError> {
        Ok(self
            .state
            .lock()
            .matching(locator)
            .iter()
            .map(|e| e.text.trim().to_string())
            .collect())
    }

    async fn attributes(
        &self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, BrowserError> {
        Ok(self
            .state
            .lock()
            .matching(locator)
            .iter()
            .map(|e| e.attrs.get(name).cloned())
            .collect())
    }

    async fn table_rows(
        &self,
        _row_css: &str,
        _cell_css: &str,
    ) -> Result<Vec<Vec<String>>, BrowserError> {
        let state = self.state.lock();
        match state.screen() {
            Some(screen) if screen.broken_table => Err(BrowserError::Driver {
                error: "stale element reference".into(),
                message: "table detached".into(),
            }),
            Some(screen) => Ok(screen.rows.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn evaluate(&self, script: &str, _args: Vec<Value>) -> Result<Value, BrowserError> {
        if script.contains("document.readyState") {
            return Ok(Value::String("complete".into()));
        }
        Ok(Value::Null)
    }

    async fn export_session_state(&self) -> Result<SessionState, BrowserError> {
        let state = self.state.lock();
        if state.fail_export {
            return Err(BrowserError::Driver {
                error: "no such window".into(),
                message: "export failed".into(),
            });
        }
        Ok(state.exported.clone())
    }

    async fn restore_session_state(&self, session: &SessionState) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        if state.fail_restore {
            return Err(BrowserError::Driver {
                error: "invalid cookie domain".into(),
                message: "restore failed".into(),
            });
        }
        state.session = Some(session.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Hands out clones of one [`FakePage`].
pub struct FakeLauncher {
    page: FakePage,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.page.state.lock().closed = false;
        Ok(Box::new(self.page.clone()))
    }
}
