//! Portal credential database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Portal credential row.
///
/// Secret columns hold vault ciphertext (`iv:authTag:ciphertext`), never
/// plaintext. Decryption happens in [`crate::credentials`].
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct CredentialDbModel {
    /// Unique identifier (UUID)
    pub id: String,
    /// Display name, e.g. "Epic MyChart"
    pub service_name: String,
    /// Portal type key (epic, carespace, cerner, athena, generic)
    pub portal_type: String,
    /// Portal entry URL (browser connectors)
    pub base_url: Option<String>,
    pub username_encrypted: String,
    pub password_encrypted: String,
    /// MFA method hint: none, totp, sms, email
    pub mfa_method: String,
    pub totp_secret_encrypted: Option<String>,
    pub notes_encrypted: Option<String>,
    /// Unix epoch milliseconds of the last finished sync attempt
    pub last_sync: Option<i64>,
    /// Status of the last sync attempt (success, failed)
    pub last_sync_status: Option<String>,
    pub last_sync_records: i64,
    pub last_sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CredentialDbModel {
    /// Create a new credential row from already encrypted secrets.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_name: impl Into<String>,
        portal_type: impl Into<String>,
        base_url: Option<String>,
        username_encrypted: String,
        password_encrypted: String,
        mfa_method: impl Into<String>,
        totp_secret_encrypted: Option<String>,
        notes_encrypted: Option<String>,
    ) -> Self {
        let now = crate::database::time::now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            portal_type: portal_type.into(),
            base_url,
            username_encrypted,
            password_encrypted,
            mfa_method: mfa_method.into(),
            totp_secret_encrypted,
            notes_encrypted,
            last_sync: None,
            last_sync_status: None,
            last_sync_records: 0,
            last_sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for CredentialDbModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDbModel")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("portal_type", &self.portal_type)
            .field("base_url", &self.base_url)
            .field("last_sync", &self.last_sync)
            .field("last_sync_status", &self.last_sync_status)
            .field("last_sync_records", &self.last_sync_records)
            .finish_non_exhaustive()
    }
}

/// Last-sync summary written to a credential after every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSyncUpdate {
    pub status: super::SyncLogStatus,
    pub records_imported: i64,
    pub error_message: Option<String>,
    pub finished_at: i64,
}
