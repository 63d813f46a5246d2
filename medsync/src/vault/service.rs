//! Vault lifecycle: setup, unlock, lock, status.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::crypto::{self, VaultKey};
use super::{VaultError, VaultHandle};
use crate::database::models::VaultMasterDbModel;
use crate::database::repositories::VaultRepository;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VaultStatus {
    pub initialized: bool,
    pub unlocked: bool,
}

pub struct VaultService {
    repo: Arc<dyn VaultRepository>,
    handle: VaultHandle,
    iterations: u32,
}

impl VaultService {
    pub fn new(repo: Arc<dyn VaultRepository>, handle: VaultHandle) -> Self {
        Self {
            repo,
            handle,
            iterations: crypto::PBKDF2_ITERATIONS,
        }
    }

    /// Override the iteration count used for new vaults.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn handle(&self) -> &VaultHandle {
        &self.handle
    }

    /// First-time setup. Stores salt and verification hash, then unlocks.
    #[instrument(skip_all)]
    pub async fn setup(&self, password: &str) -> Result<(), VaultError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(VaultError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.repo.get_master().await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let password = Zeroizing::new(password.to_owned());
        let iterations = self.iterations;
        let (salt, hash, key) = tokio::task::spawn_blocking(move || {
            let salt = crypto::generate_salt();
            let hash = crypto::verification_hash(&password, &salt, iterations);
            let key = crypto::derive_encryption_key(&password, &salt, iterations);
            (salt, hash, key)
        })
        .await
        .map_err(|e| VaultError::Crypto(format!("key derivation task failed: {e}")))?;

        let master = VaultMasterDbModel::new(hash, BASE64.encode(salt), iterations);
        if !self.repo.create_master(&master).await? {
            return Err(VaultError::AlreadyInitialized);
        }

        self.handle.install(key);
        info!(iterations, "Vault initialized and unlocked");
        Ok(())
    }

    /// Verify the master password and hold the derived key in memory.
    #[instrument(skip_all)]
    pub async fn unlock(&self, password: &str) -> Result<(), VaultError> {
        let master = self
            .repo
            .get_master()
            .await?
            .ok_or(VaultError::NotInitialized)?;

        let salt = BASE64
            .decode(&master.salt)
            .map_err(|_| VaultError::Crypto("stored salt is not base64".to_string()))?;
        let iterations = u32::try_from(master.iterations)
            .map_err(|_| VaultError::Crypto("stored iteration count out of range".to_string()))?;

        let password = Zeroizing::new(password.to_owned());
        let expected = master.password_hash;
        let key: Option<VaultKey> = tokio::task::spawn_blocking(move || {
            let hash = crypto::verification_hash(&password, &salt, iterations);
            if !crypto::constant_time_eq(hash.as_bytes(), expected.as_bytes()) {
                return None;
            }
            Some(crypto::derive_encryption_key(&password, &salt, iterations))
        })
        .await
        .map_err(|e| VaultError::Crypto(format!("key derivation task failed: {e}")))?;

        let Some(key) = key else {
            warn!("Vault unlock rejected");
            return Err(VaultError::InvalidCredential);
        };

        self.handle.install(key);
        info!("Vault unlocked");
        Ok(())
    }

    pub fn lock(&self) {
        self.handle.clear();
        info!("Vault locked");
    }

    pub async fn status(&self) -> Result<VaultStatus, VaultError> {
        Ok(VaultStatus {
            initialized: self.repo.get_master().await?.is_some(),
            unlocked: self.handle.is_unlocked(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxVaultRepository;
    use crate::database::test_support::setup_test_db;

    async fn service() -> (tempfile::TempDir, VaultService) {
        let (dir, pool) = setup_test_db().await;
        let repo = Arc::new(SqlxVaultRepository::new(pool.clone(), pool));
        let service = VaultService::new(repo, VaultHandle::new()).with_iterations(1_000);
        (dir, service)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (_dir, vault) = service().await;

        assert_eq!(
            vault.status().await.unwrap(),
            VaultStatus {
                initialized: false,
                unlocked: false
            }
        );
        assert!(matches!(
            vault.unlock("whatever1").await,
            Err(VaultError::NotInitialized)
        ));

        vault.setup("correct horse").await.unwrap();
        assert!(vault.status().await.unwrap().unlocked);
        let sealed = vault.handle().encrypt("portal-password").unwrap();

        vault.lock();
        assert!(matches!(
            vault.handle().decrypt(&sealed),
            Err(VaultError::Locked)
        ));

        assert!(matches!(
            vault.unlock("wrong horse").await,
            Err(VaultError::InvalidCredential)
        ));
        assert!(!vault.status().await.unwrap().unlocked);

        vault.unlock("correct horse").await.unwrap();
        assert_eq!(vault.handle().decrypt(&sealed).unwrap(), "portal-password");
    }

    #[tokio::test]
    async fn test_setup_rules() {
        let (_dir, vault) = service().await;

        assert!(matches!(
            vault.setup("short").await,
            Err(VaultError::WeakPassword { min: 8 })
        ));
        vault.setup("long enough").await.unwrap();
        assert!(matches!(
            vault.setup("another one").await,
            Err(VaultError::AlreadyInitialized)
        ));
    }
}
