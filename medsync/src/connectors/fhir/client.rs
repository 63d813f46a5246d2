//! SMART on FHIR client: authorization, token upkeep and paginated reads.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::FhirError;
use super::transport::FhirTransport;
use super::types::{AccessToken, AuthorizedToken, TokenStatus};
use crate::config::FhirConfig;
use crate::database::models::{OAuthStateDbModel, OAuthTokenDbModel};
use crate::database::repositories::OAuthRepository;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::vault::{VaultHandle, VaultKey, crypto};

/// Scopes requested at authorization time.
pub const SMART_SCOPES: &[&str] = &[
    "patient/Observation.read",
    "patient/DiagnosticReport.read",
    "patient/DocumentReference.read",
    "patient/MedicationRequest.read",
    "patient/Condition.read",
    "patient/Patient.read",
    "launch/patient",
    "offline_access",
];

/// Pending states live this long.
pub const STATE_TTL_MINUTES: i64 = 10;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Upper bound on pages followed for a single search.
pub const MAX_PAGES: usize = 1000;

/// Used when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

pub struct SmartFhirClient {
    config: FhirConfig,
    transport: Arc<dyn FhirTransport>,
    oauth: Arc<dyn OAuthRepository>,
    vault: VaultHandle,
}

impl SmartFhirClient {
    pub fn new(
        config: FhirConfig,
        transport: Arc<dyn FhirTransport>,
        oauth: Arc<dyn OAuthRepository>,
        vault: VaultHandle,
    ) -> Self {
        Self {
            config,
            transport,
            oauth,
            vault,
        }
    }

    pub fn config(&self) -> &FhirConfig {
        &self.config
    }

    fn client_id(&self) -> Result<&str, FhirError> {
        self.config
            .client_id
            .as_deref()
            .ok_or_else(|| FhirError::Configuration("FHIR_CLIENT_ID is not configured".into()))
    }

    /// Start authorization: store a fresh state and return the IdP URL.
    ///
    /// Any earlier pending state for the credential is replaced.
    #[instrument(skip(self))]
    pub async fn authorization_url(&self, credential_id: &str) -> Result<String, FhirError> {
        let client_id = self.client_id()?;

        let purged = self.oauth.purge_expired_states(now_ms()).await?;
        if purged > 0 {
            debug!(purged, "Purged expired OAuth states");
        }

        let state = hex::encode(rand::random::<[u8; 32]>());
        let record = OAuthStateDbModel::new(
            credential_id,
            state.as_str(),
            Duration::minutes(STATE_TTL_MINUTES),
        );
        self.oauth.upsert_state(&record).await?;

        let scope = SMART_SCOPES.join(" ");
        let url = url::Url::parse_with_params(
            &self.config.authorization_url,
            [
                ("response_type", "code"),
                ("client_id", client_id),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("aud", self.config.base_url.as_str()),
            ],
        )
        .map_err(|e| FhirError::Configuration(format!("invalid authorization URL: {e}")))?;

        info!("Issued SMART authorization URL");
        Ok(url.into())
    }

    /// Finish authorization: validate state, exchange the code, store tokens.
    ///
    /// Nothing is sent to the token endpoint unless the state matches a
    /// pending row created by [`Self::authorization_url`]. The state is
    /// single use: it is gone after this call whatever the outcome.
    #[instrument(skip_all)]
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        state: &str,
    ) -> Result<AuthorizedToken, FhirError> {
        let client_id = self.client_id()?;
        let key = self.vault.checkout()?;

        // The state is consumed before the token call; a replayed or
        // concurrent callback finds nothing.
        let pending = self
            .oauth
            .take_state(state)
            .await?
            .ok_or(FhirError::StateMismatch)?;
        let credential_id = pending.credential_id.clone();

        if pending.is_expired_at(Utc::now()) {
            warn!(credential_id = %credential_id, "OAuth state expired");
            return Err(FhirError::AuthorizationExpired);
        }

        let token = self
            .transport
            .post_token(
                &self.config.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", self.config.redirect_uri.as_str()),
                    ("client_id", client_id),
                ],
            )
            .await?;

        let patient_id = token.patient.clone().ok_or_else(|| FhirError::TokenExchange {
            status: 200,
            body: "token response has no patient context".to_string(),
        })?;

        let now = now_ms();
        let expires_at = expiry_from(token.expires_in);
        let row = OAuthTokenDbModel {
            credential_id: credential_id.clone(),
            access_token: crypto::encrypt_field(&key, &token.access_token)?,
            refresh_token: token
                .refresh_token
                .as_deref()
                .map(|t| crypto::encrypt_field(&key, t))
                .transpose()?,
            patient_id: patient_id.clone(),
            expires_at,
            scope: token.scope.clone(),
            created_at: now,
            updated_at: now,
        };
        self.oauth.upsert_token(&row).await?;

        info!(credential_id = %credential_id, "SMART authorization complete");
        Ok(AuthorizedToken {
            credential_id,
            patient_id,
            expires_at,
        })
    }

    /// Access token for FHIR reads, refreshed first when it is about to expire.
    ///
    /// Tokens are decrypted and re-encrypted with `key`, the key the caller
    /// checked out, so a sync already under way survives a vault lock.
    #[instrument(skip(self, key))]
    pub async fn get_valid_access_token(
        &self,
        credential_id: &str,
        key: &VaultKey,
    ) -> Result<AccessToken, FhirError> {
        let row = self
            .oauth
            .get_token(credential_id)
            .await?
            .ok_or_else(|| FhirError::NotAuthorized(credential_id.to_string()))?;

        if row.expires_within(Utc::now(), Duration::minutes(REFRESH_MARGIN_MINUTES)) {
            debug!("Access token expires soon, refreshing");
            return self.refresh(row, key).await;
        }

        Ok(AccessToken {
            access_token: crypto::decrypt_field(key, &row.access_token)?,
            patient_id: row.patient_id,
        })
    }

    /// Run a refresh_token grant and store the new access token.
    ///
    /// A rejected grant maps to [`FhirError::ReauthorizationRequired`]; it is
    /// not retried.
    async fn refresh(
        &self,
        row: OAuthTokenDbModel,
        key: &VaultKey,
    ) -> Result<AccessToken, FhirError> {
        let client_id = self.client_id()?;

        let encrypted_refresh = row.refresh_token.as_deref().ok_or_else(|| {
            FhirError::ReauthorizationRequired("no refresh token stored".to_string())
        })?;
        let refresh_token = crypto::decrypt_field(key, encrypted_refresh)?;

        let token = self
            .transport
            .post_token(
                &self.config.token_url,
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                    ("client_id", client_id),
                ],
            )
            .await
            .map_err(|e| match e {
                FhirError::TokenExchange { status, body } => FhirError::ReauthorizationRequired(
                    format!("token refresh rejected ({status}): {body}"),
                ),
                other => other,
            })?;

        let updated = OAuthTokenDbModel {
            access_token: crypto::encrypt_field(key, &token.access_token)?,
            // Keep the previous refresh token when the IdP does not rotate it.
            refresh_token: match token.refresh_token.as_deref() {
                Some(t) => Some(crypto::encrypt_field(key, t)?),
                None => row.refresh_token.clone(),
            },
            expires_at: expiry_from(token.expires_in),
            scope: token.scope.clone().or(row.scope.clone()),
            updated_at: now_ms(),
            ..row
        };
        self.oauth.upsert_token(&updated).await?;

        info!(credential_id = %updated.credential_id, "Access token refreshed");
        Ok(AccessToken {
            access_token: token.access_token,
            patient_id: updated.patient_id,
        })
    }

    /// Follow `link[rel=next]` from `path` and collect every `entry.resource`.
    ///
    /// `path` is relative to the FHIR base. A `next` URL outside the base is
    /// refused so the bearer token never leaves the configured server.
    pub async fn fetch_all_pages(
        &self,
        access_token: &str,
        path: &str,
    ) -> Result<Vec<Value>, FhirError> {
        let base = self.config.base_url.trim_end_matches('/');
        let mut next = Some(format!("{}/{}", base, path.trim_start_matches('/')));
        let mut resources = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages >= MAX_PAGES {
                return Err(FhirError::Pagination(format!(
                    "more than {MAX_PAGES} pages for {path}"
                )));
            }
            let bundle = self.transport.get_bundle(&url, access_token).await?;
            pages += 1;

            resources.extend(bundle.entry.into_iter().filter_map(|e| e.resource));

            if let Some(link) = bundle.link.iter().find(|l| l.relation == "next") {
                if !is_within_base(&link.url, base) {
                    return Err(FhirError::Pagination(format!(
                        "next link outside FHIR base: {}",
                        link.url
                    )));
                }
                next = Some(link.url.clone());
            }
        }

        debug!(path, pages, resources = resources.len(), "Fetched FHIR search");
        Ok(resources)
    }

    pub async fn status(&self, credential_id: &str) -> Result<TokenStatus, FhirError> {
        let Some(row) = self.oauth.get_token(credential_id).await? else {
            return Ok(TokenStatus {
                authorized: false,
                valid: false,
                patient_id: None,
                expires_at: None,
                scope: None,
                message: "Not authorized".to_string(),
            });
        };

        let valid = row.is_valid_at(Utc::now());
        let message = if valid {
            "Authorized"
        } else if row.refresh_token.is_some() {
            "Access token expired; it will be refreshed on next sync"
        } else {
            "Access token expired; re-authorization required"
        };
        Ok(TokenStatus {
            authorized: true,
            valid,
            patient_id: Some(row.patient_id),
            expires_at: Some(row.expires_at),
            scope: row.scope,
            message: message.to_string(),
        })
    }

    /// Forget stored tokens. Returns `false` if there were none.
    #[instrument(skip(self))]
    pub async fn revoke(&self, credential_id: &str) -> Result<bool, FhirError> {
        let removed = self.oauth.delete_token(credential_id).await?;
        if removed {
            info!("FHIR authorization revoked");
        }
        Ok(removed)
    }
}

fn expiry_from(expires_in: Option<i64>) -> i64 {
    let secs = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
    datetime_to_ms(Utc::now() + Duration::seconds(secs))
}

fn is_within_base(url: &str, base: &str) -> bool {
    match url.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::fhir::testing::{FakeFhirTransport, bundle_page};
    use crate::database::models::CredentialDbModel;
    use crate::database::repositories::{
        CredentialRepository, SqlxCredentialRepository, SqlxOAuthRepository,
    };
    use crate::database::test_support::setup_test_db;
    use crate::vault::VaultKey;
    use serde_json::json;

    const BASE: &str = "https://fhir.example.org/R4";

    struct Fixture {
        _dir: tempfile::TempDir,
        client: SmartFhirClient,
        transport: Arc<FakeFhirTransport>,
        oauth: Arc<SqlxOAuthRepository>,
        credential_id: String,
        vault: VaultHandle,
    }

    async fn fixture() -> Fixture {
        let (dir, pool) = setup_test_db().await;
        let credentials = SqlxCredentialRepository::new(pool.clone(), pool.clone());
        let credential = CredentialDbModel::new(
            "Epic MyChart",
            "epic",
            None,
            "u".into(),
            "p".into(),
            "none",
            None,
            None,
        );
        credentials.create(&credential).await.unwrap();

        let vault = VaultHandle::new();
        vault.install(VaultKey::from_bytes([1u8; crypto::KEY_LEN]));
        let oauth = Arc::new(SqlxOAuthRepository::new(pool.clone(), pool));
        let transport = Arc::new(FakeFhirTransport::default());
        let config = FhirConfig {
            client_id: Some("client-123".into()),
            base_url: BASE.into(),
            authorization_url: "https://idp.example.org/authorize".into(),
            token_url: "https://idp.example.org/token".into(),
            redirect_uri: "http://localhost:3000/api/fhir/callback".into(),
        };
        let client = SmartFhirClient::new(config, transport.clone(), oauth.clone(), vault.clone());

        Fixture {
            _dir: dir,
            client,
            transport,
            oauth,
            credential_id: credential.id,
            vault,
        }
    }

    impl Fixture {
        fn key(&self) -> Arc<VaultKey> {
            self.vault.checkout().unwrap()
        }
    }

    fn state_from(url: &str) -> String {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn store_token(f: &Fixture, expires_in: Duration, refresh: Option<&str>) {
        let now = now_ms();
        f.oauth
            .upsert_token(&OAuthTokenDbModel {
                credential_id: f.credential_id.clone(),
                access_token: f.vault.encrypt("old-access").unwrap(),
                refresh_token: refresh.map(|r| f.vault.encrypt(r).unwrap()),
                patient_id: "patient-1".into(),
                expires_at: now + expires_in.num_milliseconds(),
                scope: Some("launch/patient".into()),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_authorization_url_parameters() {
        let f = fixture().await;
        let url = f.client.authorization_url(&f.credential_id).await.unwrap();
        let parsed = url::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://idp.example.org/authorize?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["aud"], BASE);
        assert_eq!(params["state"].len(), 64);
        assert!(params["scope"].contains("launch/patient"));
        assert!(params["scope"].contains("offline_access"));
    }

    #[tokio::test]
    async fn test_missing_client_id_is_configuration_error() {
        let mut f = fixture().await;
        f.client.config.client_id = None;
        assert!(matches!(
            f.client.authorization_url(&f.credential_id).await,
            Err(FhirError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_consumes_state() {
        let f = fixture().await;
        let url = f.client.authorization_url(&f.credential_id).await.unwrap();
        let state = state_from(&url);

        f.transport.push_token(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "scope": "launch/patient",
            "patient": "patient-1"
        }));

        let token = f
            .client
            .exchange_code_for_token("code-1", &state)
            .await
            .unwrap();
        assert_eq!(token.credential_id, f.credential_id);
        assert_eq!(token.patient_id, "patient-1");

        assert!(f.oauth.find_state(&state).await.unwrap().is_none());
        let stored = f.oauth.get_token(&f.credential_id).await.unwrap().unwrap();
        assert_ne!(stored.access_token, "access-1");
        assert_eq!(f.vault.decrypt(&stored.access_token).unwrap(), "access-1");

        let form = &f.transport.token_requests()[0];
        assert!(form.contains(&("grant_type".into(), "authorization_code".into())));
        assert!(form.contains(&("code".into(), "code-1".into())));

        // Replay with the consumed state.
        assert!(matches!(
            f.client.exchange_code_for_token("code-1", &state).await,
            Err(FhirError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_exchange_once() {
        let f = fixture().await;
        let url = f.client.authorization_url(&f.credential_id).await.unwrap();
        let state = state_from(&url);
        f.transport.push_token(json!({
            "access_token": "access-1",
            "expires_in": 3600,
            "patient": "patient-1"
        }));

        let (a, b) = tokio::join!(
            f.client.exchange_code_for_token("code-1", &state),
            f.client.exchange_code_for_token("code-1", &state),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(FhirError::StateMismatch)))
        );
        assert_eq!(f.transport.token_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_exchange_still_consumes_state() {
        let f = fixture().await;
        let url = f.client.authorization_url(&f.credential_id).await.unwrap();
        let state = state_from(&url);
        f.transport.push_token_error(400, "invalid_grant");

        assert!(matches!(
            f.client.exchange_code_for_token("bad-code", &state).await,
            Err(FhirError::TokenExchange { .. })
        ));
        assert!(matches!(
            f.client.exchange_code_for_token("bad-code", &state).await,
            Err(FhirError::StateMismatch)
        ));
        assert_eq!(f.transport.token_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_state_makes_no_http_call() {
        let f = fixture().await;
        assert!(matches!(
            f.client.exchange_code_for_token("code", "forged").await,
            Err(FhirError::StateMismatch)
        ));
        assert!(f.transport.token_requests().is_empty());
    }

    #[tokio::test]
    async fn test_expired_state() {
        let f = fixture().await;
        let stale = OAuthStateDbModel::new(&f.credential_id, "stale-state", Duration::minutes(-1));
        f.oauth.upsert_state(&stale).await.unwrap();

        assert!(matches!(
            f.client.exchange_code_for_token("code", "stale-state").await,
            Err(FhirError::AuthorizationExpired)
        ));
        assert!(f.transport.token_requests().is_empty());
    }

    #[tokio::test]
    async fn test_not_authorized_without_token() {
        let f = fixture().await;
        assert!(matches!(
            f.client.get_valid_access_token(&f.credential_id, &f.key()).await,
            Err(FhirError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let f = fixture().await;
        store_token(&f, Duration::hours(1), Some("refresh-1")).await;

        let token = f
            .client
            .get_valid_access_token(&f.credential_id, &f.key())
            .await
            .unwrap();
        assert_eq!(token.access_token, "old-access");
        assert!(f.transport.token_requests().is_empty());
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_keeping_refresh_token() {
        let f = fixture().await;
        store_token(&f, Duration::minutes(2), Some("refresh-1")).await;
        f.transport
            .push_token(json!({"access_token": "new-access", "expires_in": 3600}));

        let token = f
            .client
            .get_valid_access_token(&f.credential_id, &f.key())
            .await
            .unwrap();
        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.patient_id, "patient-1");

        let form = &f.transport.token_requests()[0];
        assert!(form.contains(&("grant_type".into(), "refresh_token".into())));
        assert!(form.contains(&("refresh_token".into(), "refresh-1".into())));

        let stored = f.oauth.get_token(&f.credential_id).await.unwrap().unwrap();
        assert_eq!(f.vault.decrypt(&stored.access_token).unwrap(), "new-access");
        assert_eq!(
            f.vault
                .decrypt(stored.refresh_token.as_deref().unwrap())
                .unwrap(),
            "refresh-1"
        );
        assert!(!stored.expires_within(Utc::now(), Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_refresh_with_checked_out_key_after_lock() {
        let f = fixture().await;
        store_token(&f, Duration::minutes(1), Some("refresh-1")).await;
        f.transport
            .push_token(json!({"access_token": "new-access", "expires_in": 3600}));

        let key = f.key();
        f.vault.clear();

        let token = f
            .client
            .get_valid_access_token(&f.credential_id, &key)
            .await
            .unwrap();
        assert_eq!(token.access_token, "new-access");

        let stored = f.oauth.get_token(&f.credential_id).await.unwrap().unwrap();
        assert_eq!(
            crypto::decrypt_field(&key, &stored.access_token).unwrap(),
            "new-access"
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_requires_reauthorization() {
        let f = fixture().await;
        store_token(&f, Duration::minutes(-10), Some("refresh-1")).await;
        f.transport.push_token_error(400, "invalid_grant");

        assert!(matches!(
            f.client.get_valid_access_token(&f.credential_id, &f.key()).await,
            Err(FhirError::ReauthorizationRequired(_))
        ));
        assert_eq!(f.transport.token_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_requires_reauthorization() {
        let f = fixture().await;
        store_token(&f, Duration::minutes(1), None).await;
        assert!(matches!(
            f.client.get_valid_access_token(&f.credential_id, &f.key()).await,
            Err(FhirError::ReauthorizationRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_three_pages_in_order() {
        let f = fixture().await;
        f.transport.put_page(
            &format!("{BASE}/Observation?patient=p1"),
            bundle_page(&["a", "b"], Some(&format!("{BASE}/Observation?page=2"))),
        );
        f.transport.put_page(
            &format!("{BASE}/Observation?page=2"),
            bundle_page(&["c"], Some(&format!("{BASE}/Observation?page=3"))),
        );
        f.transport
            .put_page(&format!("{BASE}/Observation?page=3"), bundle_page(&["d", "e"], None));

        let resources = f
            .client
            .fetch_all_pages("token", "Observation?patient=p1")
            .await
            .unwrap();
        let ids: Vec<&str> = resources.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);
        assert_eq!(f.transport.bundle_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_empty_and_single_page() {
        let f = fixture().await;
        f.transport
            .put_page(&format!("{BASE}/Condition?patient=p1"), bundle_page(&[], None));
        f.transport.put_page(
            &format!("{BASE}/MedicationRequest?patient=p1"),
            bundle_page(&["m1"], None),
        );

        assert!(
            f.client
                .fetch_all_pages("token", "Condition?patient=p1")
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            f.client
                .fetch_all_pages("token", "MedicationRequest?patient=p1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_foreign_next_link_is_refused() {
        let f = fixture().await;
        f.transport.put_page(
            &format!("{BASE}/Observation?patient=p1"),
            bundle_page(&["a"], Some("https://evil.example.com/steal")),
        );

        assert!(matches!(
            f.client
                .fetch_all_pages("token", "Observation?patient=p1")
                .await,
            Err(FhirError::Pagination(_))
        ));
        assert_eq!(f.transport.bundle_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_status_and_revoke() {
        let f = fixture().await;
        assert!(!f.client.status(&f.credential_id).await.unwrap().authorized);

        store_token(&f, Duration::hours(1), Some("refresh-1")).await;
        let status = f.client.status(&f.credential_id).await.unwrap();
        assert!(status.authorized);
        assert!(status.valid);
        assert_eq!(status.patient_id.as_deref(), Some("patient-1"));

        assert!(f.client.revoke(&f.credential_id).await.unwrap());
        assert!(!f.client.revoke(&f.credential_id).await.unwrap());
    }

    #[test]
    fn test_is_within_base() {
        assert!(is_within_base(&format!("{BASE}/Observation?page=2"), BASE));
        assert!(is_within_base(&format!("{BASE}?_getpages=x"), BASE));
        assert!(!is_within_base("https://fhir.example.org/R4evil/x", BASE));
        assert!(!is_within_base("https://other.example.org/R4/x", BASE));
    }
}
