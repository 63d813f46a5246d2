//! Portal credential types.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::CredentialError;
use crate::database::models::CredentialDbModel;
use crate::vault::{VaultKey, crypto};

/// Known portal types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PortalType {
    Epic,
    Carespace,
    Cerner,
    Athena,
    Generic,
}

/// How a portal type is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    /// SMART on FHIR API.
    Fhir,
    /// Headless browser scraping.
    Browser,
    /// No automated connector; the user enters data by hand.
    Manual,
}

impl PortalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Carespace => "carespace",
            Self::Cerner => "cerner",
            Self::Athena => "athena",
            Self::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    pub fn connector_kind(&self) -> ConnectorKind {
        match self {
            Self::Epic => ConnectorKind::Fhir,
            Self::Carespace => ConnectorKind::Browser,
            Self::Cerner | Self::Athena | Self::Generic => ConnectorKind::Manual,
        }
    }
}

/// Input for creating a credential. Secrets arrive in plaintext and are
/// encrypted before they reach the database.
#[derive(Clone, Deserialize)]
pub struct NewCredential {
    pub service_name: String,
    pub portal_type: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub mfa_method: Option<String>,
    #[serde(default)]
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl std::fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCredential")
            .field("service_name", &self.service_name)
            .field("portal_type", &self.portal_type)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Non-secret view of a stored credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub service_name: String,
    pub portal_type: String,
    pub base_url: Option<String>,
    pub mfa_method: String,
    pub last_sync: Option<i64>,
    pub last_sync_status: Option<String>,
    pub last_sync_records: i64,
    pub last_sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<CredentialDbModel> for CredentialSummary {
    fn from(model: CredentialDbModel) -> Self {
        Self {
            id: model.id,
            service_name: model.service_name,
            portal_type: model.portal_type,
            base_url: model.base_url,
            mfa_method: model.mfa_method,
            last_sync: model.last_sync,
            last_sync_status: model.last_sync_status,
            last_sync_records: model.last_sync_records,
            last_sync_error: model.last_sync_error,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Decrypted credential handed to connectors.
///
/// Secret fields are wiped on drop.
#[derive(Clone)]
pub struct PortalCredential {
    pub id: String,
    pub service_name: String,
    pub portal_type: PortalType,
    pub base_url: Option<String>,
    pub username: String,
    pub password: String,
    pub mfa_method: String,
    pub totp_secret: Option<String>,
}

impl PortalCredential {
    /// Decrypt a stored row with a checked-out vault key.
    pub fn decrypt(model: &CredentialDbModel, key: &VaultKey) -> Result<Self, CredentialError> {
        let portal_type = PortalType::parse(&model.portal_type)
            .ok_or_else(|| CredentialError::UnsupportedPortalType(model.portal_type.clone()))?;

        let username = crypto::decrypt_field(key, &model.username_encrypted)?;
        let password = crypto::decrypt_field(key, &model.password_encrypted)?;
        let totp_secret = model
            .totp_secret_encrypted
            .as_deref()
            .map(|v| crypto::decrypt_field(key, v))
            .transpose()?;

        Ok(Self {
            id: model.id.clone(),
            service_name: model.service_name.clone(),
            portal_type,
            base_url: model.base_url.clone(),
            username,
            password,
            mfa_method: model.mfa_method.clone(),
            totp_secret,
        })
    }
}

impl std::fmt::Debug for PortalCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredential")
            .field("id", &self.id)
            .field("service_name", &self.service_name)
            .field("portal_type", &self.portal_type)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Drop for PortalCredential {
    fn drop(&mut self) {
        self.username.zeroize();
        self.password.zeroize();
        if let Some(secret) = self.totp_secret.as_mut() {
            secret.zeroize();
        }
    }
}
