//! Portal login state machine.
//!
//! ```text
//! NoSession ─┬─> AttemptingCachedAuth ─┬─> Authenticated
//!            │                         └─> LoggingIn (stale cache deleted)
//!            └─> LoggingIn ─┬─> Authenticated
//!                           ├─> MfaRequired
//!                           └─> Failed
//! ```
//!
//! `LoggingIn` never returns to `AttemptingCachedAuth`, so a stale cache
//! costs at most one extra navigation.

use tracing::{debug, info, instrument, warn};

use super::detector::{PortalProfile, any_present};
use super::driver::{
    LOAD_POLL_INTERVAL, NAVIGATION_TIMEOUT, NETWORK_IDLE_TIMEOUT, soft_timeout,
};
use super::{BrowserError, BrowserPage, SessionCache, SessionState};
use crate::credentials::PortalCredential;

#[derive(Debug)]
enum LoginState {
    NoSession,
    AttemptingCachedAuth(SessionState),
    LoggingIn,
    Authenticated,
    MfaRequired,
    Failed,
}

/// Terminal, non-error results of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated { from_cache: bool },
    /// A second factor is required; the user has to finish it by hand.
    MfaRequired,
}

pub struct LoginFlow<'a> {
    page: &'a dyn BrowserPage,
    profile: &'a PortalProfile,
    cache: &'a SessionCache,
    credential: &'a PortalCredential,
    entry_url: &'a str,
}

impl<'a> LoginFlow<'a> {
    pub fn new(
        page: &'a dyn BrowserPage,
        profile: &'a PortalProfile,
        cache: &'a SessionCache,
        credential: &'a PortalCredential,
        entry_url: &'a str,
    ) -> Self {
        Self {
            page,
            profile,
            cache,
            credential,
            entry_url,
        }
    }

    /// Drive the machine to a terminal state. `Failed` becomes
    /// [`BrowserError::LoginFailed`].
    #[instrument(skip_all, fields(credential_id = %self.credential.id, portal = self.profile.key))]
    pub async fn run(&self) -> Result<LoginOutcome, BrowserError> {
        let mut state = LoginState::NoSession;
        let mut from_cache = false;

        loop {
            state = match state {
                LoginState::NoSession => {
                    match self.cache.load(self.profile.key, &self.credential.id).await {
                        Some(session) => LoginState::AttemptingCachedAuth(session),
                        None => LoginState::LoggingIn,
                    }
                }
                LoginState::AttemptingCachedAuth(session) => {
                    if self.resume(&session).await? {
                        info!("Cached authentication accepted");
                        from_cache = true;
                        LoginState::Authenticated
                    } else {
                        info!("Cached authentication expired, deleting cache");
                        self.cache
                            .remove(self.profile.key, &self.credential.id)
                            .await?;
                        LoginState::LoggingIn
                    }
                }
                LoginState::LoggingIn => self.login().await?,
                LoginState::Authenticated => {
                    if !from_cache {
                        self.persist_session().await;
                    }
                    return Ok(LoginOutcome::Authenticated { from_cache });
                }
                LoginState::MfaRequired => {
                    info!("Multi-factor authentication required");
                    return Ok(LoginOutcome::MfaRequired);
                }
                LoginState::Failed => {
                    warn!("Portal login failed");
                    return Err(BrowserError::LoginFailed);
                }
            };
            debug!(state = ?state, "Login state transition");
        }
    }

    /// Restore a cached session and check that it is still signed in.
    async fn resume(&self, session: &SessionState) -> Result<bool, BrowserError> {
        if let Err(e) = self.page.restore_session_state(session).await {
            warn!(error = %e, "Failed to restore cached session");
            return Ok(false);
        }
        self.open_entry().await?;

        let url = self.page.current_url().await?;
        if self.profile.is_login_url(&url) {
            debug!(url = %url, "Cached session landed on login page");
            return Ok(false);
        }
        any_present(self.page, &self.profile.authenticated_markers).await
    }

    async fn login(&self) -> Result<LoginState, BrowserError> {
        self.open_entry().await?;
        let url = self.page.current_url().await?;
        debug!(url = %url, "Attempting login");

        let username = self.profile.username.detect(self.page).await?;
        let password = self.profile.password.detect(self.page).await?;
        let (Some(username), Some(password)) = (username, password) else {
            return Err(BrowserError::LoginFormNotDetected(url));
        };

        self.page
            .fill(&username, &self.credential.username)
            .await?;
        self.page
            .fill(&password, &self.credential.password)
            .await?;

        match self.profile.submit.detect(self.page).await? {
            Some(submit) => {
                debug!(submit = %submit, "Clicking submit");
                self.page.click(&submit).await?;
            }
            None => {
                debug!("No submit control, pressing Enter");
                self.page.press_enter(&password).await?;
            }
        }
        soft_timeout(self.await_submit(&url).await, "post-login navigation")?;
        soft_timeout(
            self.page.wait_for_load(NETWORK_IDLE_TIMEOUT).await,
            "post-login load",
        )?;

        let url = self.page.current_url().await?;
        debug!(url = %url, "After login");

        if self.profile.is_portal_url(&url)
            || any_present(self.page, &self.profile.success_markers).await?
        {
            return Ok(LoginState::Authenticated);
        }
        if any_present(self.page, &self.profile.mfa_markers).await? {
            return Ok(LoginState::MfaRequired);
        }
        Ok(LoginState::Failed)
    }

    /// Wait until the submit takes effect: the page leaves `login_url`, or
    /// a success or MFA marker appears in place. SSO forms often post by
    /// XHR and redirect from script, so `readyState` alone is not enough.
    async fn await_submit(&self, login_url: &str) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + NAVIGATION_TIMEOUT;
        loop {
            if self.page.current_url().await? != login_url
                || any_present(self.page, &self.profile.success_markers).await?
                || any_present(self.page, &self.profile.mfa_markers).await?
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::timeout(
                    "post-login navigation",
                    NAVIGATION_TIMEOUT,
                ));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    async fn open_entry(&self) -> Result<(), BrowserError> {
        self.page.goto(self.entry_url).await?;
        soft_timeout(
            self.page.wait_for_load(NETWORK_IDLE_TIMEOUT).await,
            "entry page load",
        )
    }

    /// Save the session for the next sync. Failure only costs a login.
    async fn persist_session(&self) {
        let saved = match self.page.export_session_state().await {
            Ok(session) => {
                self.cache
                    .save(self.profile.key, &self.credential.id, &session)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!(error = %e, "Could not cache browser session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::browser::testing::{FakeElement, FakePage, FakeScreen};
    use crate::connectors::browser::{Locator, SessionCookie};
    use crate::credentials::PortalType;

    const ENTRY: &str = "https://carespaceportal.com";
    const LOGIN: &str = "https://accounts.flatiron.com/login";
    const HOME: &str = "https://carespaceportal.com/health";
    const MFA: &str = "https://accounts.flatiron.com/mfa";

    fn credential() -> PortalCredential {
        PortalCredential {
            id: "cred-1".into(),
            service_name: "CareSpace".into(),
            portal_type: PortalType::Carespace,
            base_url: Some(ENTRY.into()),
            username: "patient@example.com".into(),
            password: "hunter22".into(),
            mfa_method: "none".into(),
            totp_secret: None,
        }
    }

    fn login_screen() -> FakeScreen {
        FakeScreen::new(vec![
            FakeElement::new(&[r#"input[type="email"]"#]),
            FakeElement::new(&[r#"input[type="password"]"#]),
            FakeElement::new(&[r#"button[type="submit"]"#, "button"]).with_text("Sign in"),
        ])
    }

    fn home_screen() -> FakeScreen {
        FakeScreen::new(vec![
            FakeElement::new(&["a"]).with_text("Health"),
            FakeElement::new(&["a"]).with_text("Labs"),
            FakeElement::new(&["a"]).with_text("Sign out"),
        ])
    }

    fn cached_session() -> SessionState {
        SessionState {
            origin: ENTRY.into(),
            cookies: vec![SessionCookie {
                name: "sid".into(),
                value: "cached".into(),
                domain: None,
                path: None,
                secure: None,
                http_only: None,
                expiry: None,
                same_site: None,
            }],
            local_storage: Vec::new(),
        }
    }

    /// Entry redirects to the SSO login page; submitting lands on `after`.
    fn site(after: &str, after_screen: FakeScreen) -> FakePage {
        let page = FakePage::new(LOGIN, login_screen());
        page.redirect(ENTRY, LOGIN);
        page.add_screen(after, after_screen);
        page.on_click(Locator::css(r#"button[type="submit"]"#), after);
        page
    }

    #[tokio::test]
    async fn test_fresh_login_caches_session() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = site(HOME, home_screen());
        page.set_exported_session(cached_session());
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: false });

        let filled = page.filled();
        assert_eq!(filled[0].1, "patient@example.com");
        assert_eq!(filled[1].1, "hunter22");
        assert_eq!(
            cache.load("carespace", "cred-1").await,
            Some(cached_session())
        );
    }

    #[tokio::test]
    async fn test_cached_session_skips_login() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        cache
            .save("carespace", "cred-1", &cached_session())
            .await
            .unwrap();

        let page = site(HOME, home_screen());
        page.redirect_with_session(ENTRY, HOME);
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: true });
        assert_eq!(page.restored_session(), Some(cached_session()));
        assert!(page.filled().is_empty());
    }

    #[tokio::test]
    async fn test_stale_cache_is_deleted_then_fresh_login() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        cache
            .save("carespace", "cred-1", &cached_session())
            .await
            .unwrap();

        // The restored session still lands on the login page.
        let page = site(HOME, home_screen());
        page.redirect_with_session(ENTRY, LOGIN);
        // Nothing is re-saved after the fresh login, so only the deletion
        // can empty the cache.
        page.fail_export();
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: false });
        assert_eq!(page.filled().len(), 2);
        // Entry visited once for the cache check and once for the login.
        assert_eq!(page.visited().iter().filter(|u| *u == LOGIN).count(), 2);
        assert!(cache.load("carespace", "cred-1").await.is_none());
        assert!(!cache.path_for("carespace", "cred-1").exists());
    }

    #[tokio::test]
    async fn test_script_redirect_after_submit_is_awaited() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = FakePage::new(LOGIN, login_screen());
        page.redirect(ENTRY, LOGIN);
        page.add_screen(HOME, home_screen());
        // The form posts in the background and navigates a moment later.
        page.on_click_delayed(
            Locator::css(r#"button[type="submit"]"#),
            HOME,
            std::time::Duration::from_millis(600),
        );
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: false });
        assert_eq!(page.url(), HOME);
    }

    #[tokio::test]
    async fn test_unrestorable_cache_falls_back_to_login() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        cache
            .save("carespace", "cred-1", &cached_session())
            .await
            .unwrap();

        let page = site(HOME, home_screen());
        page.fail_restore();
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: false });
    }

    #[tokio::test]
    async fn test_verification_code_page_is_mfa() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = site(
            MFA,
            FakeScreen::new(vec![
                FakeElement::new(&["h1"]).with_text("Enter verification code"),
                FakeElement::new(&[r#"input[placeholder*="code" i]"#]),
            ]),
        );
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::MfaRequired);
        assert!(cache.load("carespace", "cred-1").await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_login_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = site(
            "https://accounts.flatiron.com/login?error=1",
            FakeScreen::new(vec![
                FakeElement::new(&["p"]).with_text("Invalid email or password"),
            ]),
        );
        let profile = PortalProfile::carespace();
        let credential = credential();

        let err = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::LoginFailed));
    }

    #[tokio::test]
    async fn test_enter_fallback_without_submit_button() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = FakePage::new(
            LOGIN,
            FakeScreen::new(vec![
                FakeElement::new(&[r#"input[name="username"]"#]),
                FakeElement::new(&[r#"input[name="password"]"#]),
            ]),
        );
        page.redirect(ENTRY, LOGIN);
        page.add_screen(HOME, home_screen());
        page.on_enter(HOME);
        let profile = PortalProfile::carespace();
        let credential = credential();

        let outcome = LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated { from_cache: false });
        assert!(page.clicked().is_empty());
    }

    #[tokio::test]
    async fn test_missing_form_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let page = FakePage::new(LOGIN, FakeScreen::new(vec![]));
        page.redirect(ENTRY, LOGIN);
        let profile = PortalProfile::carespace();
        let credential = credential();

        assert!(matches!(
            LoginFlow::new(&page, &profile, &cache, &credential, ENTRY)
                .run()
                .await,
            Err(BrowserError::LoginFormNotDetected(_))
        ));
    }
}
