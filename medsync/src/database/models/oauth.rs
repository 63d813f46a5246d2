//! SMART on FHIR authorization models.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};

/// Pending authorization state (CSRF nonce).
///
/// Single use, one per credential, short-lived.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthStateDbModel {
    pub credential_id: String,
    /// 32 random bytes, hex encoded
    pub state: String,
    /// Unix epoch milliseconds after which the state is rejected
    pub expires_at: i64,
    pub created_at: i64,
}

impl OAuthStateDbModel {
    pub fn new(credential_id: impl Into<String>, state: impl Into<String>, ttl: Duration) -> Self {
        let now = now_ms();
        Self {
            credential_id: credential_id.into(),
            state: state.into(),
            expires_at: now + ttl.num_milliseconds(),
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < datetime_to_ms(now)
    }
}

impl std::fmt::Debug for OAuthStateDbModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStateDbModel")
            .field("credential_id", &self.credential_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Stored OAuth tokens for a credential.
///
/// `access_token` and `refresh_token` are vault ciphertext.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct OAuthTokenDbModel {
    pub credential_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// FHIR Patient resource id the token is scoped to
    pub patient_id: String,
    /// Unix epoch milliseconds when the access token expires
    pub expires_at: i64,
    pub scope: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl OAuthTokenDbModel {
    pub fn get_expires_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.expires_at)
    }

    /// True when the access token expires before `now + margin`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at < datetime_to_ms(now + margin)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > datetime_to_ms(now)
    }
}

impl std::fmt::Debug for OAuthTokenDbModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenDbModel")
            .field("credential_id", &self.credential_id)
            .field("patient_id", &self.patient_id)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_expiring_in(delta: Duration) -> OAuthTokenDbModel {
        let now = now_ms();
        OAuthTokenDbModel {
            credential_id: "cred".to_string(),
            access_token: "enc".to_string(),
            refresh_token: None,
            patient_id: "p1".to_string(),
            expires_at: now + delta.num_milliseconds(),
            scope: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expiry_margin() {
        let margin = Duration::minutes(5);
        assert!(token_expiring_in(Duration::minutes(1)).expires_within(Utc::now(), margin));
        assert!(!token_expiring_in(Duration::hours(1)).expires_within(Utc::now(), margin));
    }

    #[test]
    fn test_state_expiry() {
        let state = OAuthStateDbModel::new("cred", "abc", Duration::minutes(10));
        assert!(!state.is_expired_at(Utc::now()));
        assert!(state.is_expired_at(Utc::now() + Duration::minutes(11)));
    }
}
