//! Browser automation connector for portals without an API.
//!
//! One sync launches one browser: log in (reusing a cached session when it is
//! still valid), then run each section scraper. A failing section is recorded
//! in the summary and the remaining sections still run.

mod connector;
pub mod detector;
mod driver;
mod error;
pub mod labs;
mod login;
mod session_cache;
mod webdriver;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::BrowserConnector;
pub use detector::{FieldDetector, PortalProfile, Section};
pub use driver::{
    BrowserLauncher, BrowserPage, Locator, NAVIGATION_TIMEOUT, NETWORK_IDLE_TIMEOUT,
    SELECTOR_TIMEOUT, SessionCookie, SessionState, StorageEntry,
};
pub use error::BrowserError;
pub use login::{LoginFlow, LoginOutcome};
pub use session_cache::SessionCache;
pub use webdriver::{WebDriverLauncher, WebDriverPage};
