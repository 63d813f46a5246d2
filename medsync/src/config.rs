//! Environment-driven configuration.
//!
//! Everything is read through a lookup function so parsing can be tested
//! without touching the process environment.

use std::path::PathBuf;

use tracing::warn;

use crate::api::server::ApiServerConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:medsync.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_FHIR_BASE_URL: &str =
    "https://fhir.epic.com/interconnect-fhir-oauth/api/FHIR/R4";
pub const DEFAULT_FHIR_AUTHORIZATION_URL: &str =
    "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/authorize";
pub const DEFAULT_FHIR_TOKEN_URL: &str =
    "https://fhir.epic.com/interconnect-fhir-oauth/oauth2/token";
pub const DEFAULT_CHROMEDRIVER_PATH: &str = "chromedriver";
pub const DEFAULT_MAX_LAB_REPORTS: usize = 10;

/// SMART on FHIR endpoints and client registration.
#[derive(Debug, Clone)]
pub struct FhirConfig {
    /// Registered client id. `None` makes authorization fail with a
    /// configuration error.
    pub client_id: Option<String>,
    /// FHIR R4 base URL, also sent as `aud`.
    pub base_url: String,
    pub authorization_url: String,
    pub token_url: String,
    /// `{APP_BASE_URL}/api/fhir/callback`
    pub redirect_uri: String,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            base_url: DEFAULT_FHIR_BASE_URL.to_string(),
            authorization_url: DEFAULT_FHIR_AUTHORIZATION_URL.to_string(),
            token_url: DEFAULT_FHIR_TOKEN_URL.to_string(),
            redirect_uri: redirect_uri_for(DEFAULT_APP_BASE_URL),
        }
    }
}

fn redirect_uri_for(app_base_url: &str) -> String {
    format!("{}/api/fhir/callback", app_base_url.trim_end_matches('/'))
}

/// Browser automation settings.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Existing WebDriver server. When unset a driver is spawned per sync.
    pub webdriver_url: Option<String>,
    pub chromedriver_path: PathBuf,
    /// Directory holding serialized session state files.
    pub session_cache_dir: PathBuf,
    pub max_lab_reports: usize,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: None,
            chromedriver_path: PathBuf::from(DEFAULT_CHROMEDRIVER_PATH),
            session_cache_dir: std::env::temp_dir(),
            max_lab_reports: DEFAULT_MAX_LAB_REPORTS,
            headless: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    pub api: ApiServerConfig,
    pub fhir: FhirConfig,
    pub browser: BrowserConfig,
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            warn!(error = %e, "Failed to load .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut api = ApiServerConfig::default();
        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            api.bind_address = bind_address;
        }
        api.port = parse_or(get("API_PORT"), "API_PORT", api.port);

        let app_base_url = get("APP_BASE_URL").unwrap_or_else(|| DEFAULT_APP_BASE_URL.to_string());
        let fhir = FhirConfig {
            client_id: get("FHIR_CLIENT_ID"),
            base_url: get("FHIR_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_FHIR_BASE_URL.to_string()),
            authorization_url: get("FHIR_AUTHORIZATION_URL")
                .unwrap_or_else(|| DEFAULT_FHIR_AUTHORIZATION_URL.to_string()),
            token_url: get("FHIR_TOKEN_URL").unwrap_or_else(|| DEFAULT_FHIR_TOKEN_URL.to_string()),
            redirect_uri: redirect_uri_for(&app_base_url),
        };

        let defaults = BrowserConfig::default();
        let browser = BrowserConfig {
            webdriver_url: get("WEBDRIVER_URL"),
            chromedriver_path: get("CHROMEDRIVER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.chromedriver_path),
            session_cache_dir: get("SESSION_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_cache_dir),
            max_lab_reports: parse_or(
                get("MAX_LAB_REPORTS"),
                "MAX_LAB_REPORTS",
                defaults.max_lab_reports,
            ),
            headless: parse_bool_or(get("BROWSER_HEADLESS"), "BROWSER_HEADLESS", defaults.headless),
        };

        Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_dir: get("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            api,
            fhir,
            browser,
        }
    }
}

fn parse_or<T: std::str::FromStr + Copy + std::fmt::Debug>(
    value: Option<String>,
    key: &str,
    default: T,
) -> T {
    match value {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "Invalid value, using default");
            default
        }),
    }
}

fn parse_bool_or(value: Option<String>, key: &str, default: bool) -> bool {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            warn!(key, value = %other, default, "Invalid boolean, using default");
            default
        }
    }
}
