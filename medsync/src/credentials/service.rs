//! Credential service.

use std::sync::Arc;

use tracing::{info, instrument};

use super::{CredentialError, CredentialSummary, NewCredential, PortalCredential, PortalType};
use crate::database::models::CredentialDbModel;
use crate::database::repositories::CredentialRepository;
use crate::vault::{VaultHandle, crypto};

const MFA_METHODS: &[&str] = &["none", "totp", "sms", "email"];

pub struct CredentialService {
    repo: Arc<dyn CredentialRepository>,
    vault: VaultHandle,
}

impl CredentialService {
    pub fn new(repo: Arc<dyn CredentialRepository>, vault: VaultHandle) -> Self {
        Self { repo, vault }
    }

    /// Encrypt and store a new credential.
    #[instrument(skip(self, input), fields(portal_type = %input.portal_type))]
    pub async fn create(&self, input: NewCredential) -> Result<CredentialSummary, CredentialError> {
        let key = self.vault.checkout()?;

        for (field, value) in [
            ("service_name", &input.service_name),
            ("username", &input.username),
            ("password", &input.password),
        ] {
            if value.trim().is_empty() {
                return Err(CredentialError::Validation(format!("{field} is required")));
            }
        }
        let portal_type = PortalType::parse(input.portal_type.trim())
            .ok_or_else(|| CredentialError::UnsupportedPortalType(input.portal_type.clone()))?;

        let mfa_method = input.mfa_method.as_deref().unwrap_or("none");
        if !MFA_METHODS.contains(&mfa_method) {
            return Err(CredentialError::Validation(format!(
                "unknown mfa_method: {mfa_method}"
            )));
        }

        if let Some(base_url) = input.base_url.as_deref() {
            url::Url::parse(base_url)
                .map_err(|e| CredentialError::Validation(format!("invalid base_url: {e}")))?;
        }

        let encrypt_opt = |value: Option<&str>| -> Result<Option<String>, CredentialError> {
            value
                .filter(|v| !v.is_empty())
                .map(|v| crypto::encrypt_field(&key, v))
                .transpose()
                .map_err(CredentialError::from)
        };

        let model = CredentialDbModel::new(
            input.service_name.trim(),
            portal_type.as_str(),
            input.base_url.clone(),
            crypto::encrypt_field(&key, &input.username)?,
            crypto::encrypt_field(&key, &input.password)?,
            mfa_method,
            encrypt_opt(input.totp_secret.as_deref())?,
            encrypt_opt(input.notes.as_deref())?,
        );
        self.repo.create(&model).await?;

        info!(credential_id = %model.id, "Credential stored");
        Ok(model.into())
    }

    pub async fn list(&self) -> Result<Vec<CredentialSummary>, CredentialError> {
        let credentials = self.repo.list().await?;
        Ok(credentials.into_iter().map(Into::into).collect())
    }

    pub async fn get(&self, id: &str) -> Result<CredentialSummary, CredentialError> {
        self.repo
            .get(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))
    }

    /// Load and decrypt a credential for a connector.
    pub async fn decrypt(&self, id: &str) -> Result<PortalCredential, CredentialError> {
        let key = self.vault.checkout()?;
        let model = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))?;
        PortalCredential::decrypt(&model, &key)
    }

    /// Delete a credential together with its sync logs and OAuth rows.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), CredentialError> {
        if !self.repo.delete(id).await? {
            return Err(CredentialError::NotFound(id.to_string()));
        }
        info!(credential_id = %id, "Credential deleted");
        Ok(())
    }
}
