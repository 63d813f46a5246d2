//! Portal profiles: login form detection and page markers as data.
//!
//! Supporting a new portal skin means adding candidates here, not editing
//! the login state machine.

use super::{BrowserError, BrowserPage, Locator};
use crate::credentials::PortalType;

/// Ordered selector candidates for one form control. First match wins.
#[derive(Debug, Clone)]
pub struct FieldDetector {
    candidates: Vec<Locator>,
}

impl FieldDetector {
    pub fn new(candidates: Vec<Locator>) -> Self {
        Self { candidates }
    }

    pub fn css(selectors: &[&str]) -> Self {
        Self::new(selectors.iter().map(|s| Locator::css(*s)).collect())
    }

    pub fn candidates(&self) -> &[Locator] {
        &self.candidates
    }

    pub async fn detect(&self, page: &dyn BrowserPage) -> Result<Option<Locator>, BrowserError> {
        for candidate in &self.candidates {
            if page.count(candidate).await? > 0 {
                return Ok(Some(candidate.clone()));
            }
        }
        Ok(None)
    }
}

/// `true` if any locator matches.
pub async fn any_present(page: &dyn BrowserPage, markers: &[Locator]) -> Result<bool, BrowserError> {
    for marker in markers {
        if page.count(marker).await? > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Portal sections scraped after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Labs,
    Imaging,
    Pathology,
    ClinicalNotes,
    Medications,
}

impl Section {
    /// Key in the summary `details` map.
    pub fn detail_key(&self) -> &'static str {
        match self {
            Self::Labs => "labResults",
            Self::Imaging => "imagingReports",
            Self::Pathology => "pathologyReports",
            Self::ClinicalNotes => "clinicalNotes",
            Self::Medications => "medications",
        }
    }

    /// Prefix for entries in the summary `errors` list.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Labs => "Labs",
            Self::Imaging => "Imaging",
            Self::Pathology => "Pathology",
            Self::ClinicalNotes => "Notes",
            Self::Medications => "Medications",
        }
    }
}

/// Everything the connector knows about one portal skin.
#[derive(Debug, Clone)]
pub struct PortalProfile {
    /// Used in session cache file names.
    pub key: &'static str,
    pub label: &'static str,
    /// Entry URL when the credential has no `base_url`.
    pub default_url: Option<&'static str>,
    /// Host that marks a completed SSO round trip.
    pub portal_host: Option<&'static str>,
    pub login_path: &'static str,
    pub username: FieldDetector,
    pub password: FieldDetector,
    pub submit: FieldDetector,
    /// Navigation visible only to a signed-in user; checked for cached sessions.
    pub authenticated_markers: Vec<Locator>,
    /// Markers checked right after submitting the login form.
    pub success_markers: Vec<Locator>,
    pub mfa_markers: Vec<Locator>,
    pub sections: Vec<Section>,
}

fn username_detector() -> FieldDetector {
    FieldDetector::css(&[
        r#"input[name="username"]"#,
        r#"input[name="userName"]"#,
        r#"input[name="email"]"#,
        r#"input[type="email"]"#,
        r#"input[id*="username" i]"#,
        r#"input[id*="email" i]"#,
        r#"input[placeholder*="username" i]"#,
        r#"input[placeholder*="email" i]"#,
    ])
}

fn password_detector() -> FieldDetector {
    FieldDetector::css(&[
        r#"input[type="password"]"#,
        r#"input[name="password"]"#,
        r#"input[id*="password" i]"#,
    ])
}

fn submit_detector() -> FieldDetector {
    FieldDetector::new(vec![
        Locator::css(r#"button[type="submit"]"#),
        Locator::css(r#"input[type="submit"]"#),
        Locator::text("button", r"^\s*(sign in|log in|login)\s*$"),
        Locator::text("a", r"^\s*(sign in|log in)\s*$"),
    ])
}

fn success_markers() -> Vec<Locator> {
    vec![
        Locator::any_text("dashboard"),
        Locator::any_text("welcome"),
        Locator::any_text("logout|sign out"),
        Locator::css(r#"[href*="logout"]"#),
        Locator::css(r#"[href*="signout"]"#),
        Locator::any_text("my records|health records"),
    ]
}

fn mfa_markers() -> Vec<Locator> {
    vec![
        Locator::any_text("verification code"),
        Locator::any_text("two.factor"),
        Locator::any_text("authenticator"),
        Locator::css(r#"input[placeholder*="code" i]"#),
        Locator::css(r#"input[name*="otp" i]"#),
        Locator::css(r#"input[name*="mfa" i]"#),
    ]
}

impl PortalProfile {
    /// CareSpace (Flatiron Health SSO).
    pub fn carespace() -> Self {
        Self {
            key: "carespace",
            label: "CareSpace Portal (Browser Automation)",
            default_url: Some("https://carespaceportal.com"),
            portal_host: Some("carespaceportal.com"),
            login_path: "/login",
            username: username_detector(),
            password: password_detector(),
            submit: submit_detector(),
            authenticated_markers: vec![Locator::text("a, nav *", "labs|health|appointments")],
            success_markers: success_markers(),
            mfa_markers: mfa_markers(),
            sections: vec![
                Section::Labs,
                Section::Imaging,
                Section::Pathology,
                Section::ClinicalNotes,
                Section::Medications,
            ],
        }
    }

    /// Generic username/password portal with no known host.
    pub fn generic() -> Self {
        Self {
            key: "generic",
            label: "Web Portal (Browser Automation)",
            default_url: None,
            portal_host: None,
            login_path: "/login",
            username: username_detector(),
            password: password_detector(),
            submit: submit_detector(),
            authenticated_markers: vec![Locator::text("a, nav *", "labs|health|appointments")],
            success_markers: success_markers(),
            mfa_markers: mfa_markers(),
            sections: vec![Section::Labs],
        }
    }

    pub fn for_portal(portal_type: PortalType) -> Self {
        match portal_type {
            PortalType::Carespace => Self::carespace(),
            _ => Self::generic(),
        }
    }

    /// URL landed back on the portal, outside its login path.
    pub fn is_portal_url(&self, url: &str) -> bool {
        self.portal_host.is_some_and(|host| url.contains(host)) && !self.is_login_url(url)
    }

    pub fn is_login_url(&self, url: &str) -> bool {
        url.contains(self.login_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::browser::testing::{FakeElement, FakePage, FakeScreen};

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let page = FakePage::new(
            "https://accounts.example.com/login",
            FakeScreen::new(vec![
                FakeElement::new(&[r#"input[type="email"]"#]),
                FakeElement::new(&[r#"input[name="email"]"#, r#"input[type="email"]"#]),
            ]),
        );
        let found = username_detector().detect(&page).await.unwrap();
        assert_eq!(found, Some(Locator::css(r#"input[name="email"]"#)));
    }

    #[tokio::test]
    async fn test_missing_field() {
        let page = FakePage::new("https://example.com", FakeScreen::new(vec![]));
        assert!(password_detector().detect(&page).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submit_by_text() {
        let page = FakePage::new(
            "https://example.com/login",
            FakeScreen::new(vec![FakeElement::new(&["button"]).with_text("Sign In")]),
        );
        let found = submit_detector().detect(&page).await.unwrap().unwrap();
        assert!(matches!(found, Locator::Text { .. }));
    }

    #[test]
    fn test_portal_url() {
        let profile = PortalProfile::carespace();
        assert!(profile.is_portal_url("https://carespaceportal.com/health"));
        assert!(!profile.is_portal_url("https://carespaceportal.com/login"));
        assert!(!profile.is_portal_url("https://accounts.flatiron.com/signin"));
        assert!(!PortalProfile::generic().is_portal_url("https://portal.example.com/"));
    }
}
