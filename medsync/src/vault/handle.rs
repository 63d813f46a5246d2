//! Process-wide holder of the unlocked vault key.

use std::sync::Arc;

use parking_lot::RwLock;

use super::VaultError;
use super::crypto::{self, VaultKey};

/// Shared handle to the in-memory vault key.
///
/// Cloning the handle shares the same slot. Work that needs the key calls
/// [`VaultHandle::checkout`] once and keeps the returned [`Arc`] for its
/// whole duration: [`VaultHandle::clear`] only drops the handle's own
/// reference, so in-flight work finishes with the key it checked out and new
/// work sees [`VaultError::Locked`]. The key bytes are wiped when the last
/// reference goes away.
#[derive(Clone, Default)]
pub struct VaultHandle {
    key: Arc<RwLock<Option<Arc<VaultKey>>>>,
}

impl VaultHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, key: VaultKey) {
        *self.key.write() = Some(Arc::new(key));
    }

    /// Drop the handle's reference to the key.
    pub fn clear(&self) {
        self.key.write().take();
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().is_some()
    }

    pub fn checkout(&self) -> Result<Arc<VaultKey>, VaultError> {
        self.key.read().clone().ok_or(VaultError::Locked)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let key = self.checkout()?;
        crypto::encrypt_field(&key, plaintext)
    }

    pub fn decrypt(&self, value: &str) -> Result<String, VaultError> {
        let key = self.checkout()?;
        crypto::decrypt_field(&key, value)
    }
}

impl std::fmt::Debug for VaultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultHandle")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
