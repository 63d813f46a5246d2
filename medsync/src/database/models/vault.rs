//! Vault master record.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The single `vault_master` row.
///
/// Holds what is needed to check a master password: the salt and a
/// PBKDF2-SHA-512 verification hash. The encryption key itself is derived
/// with a different PRF and is never stored.
#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct VaultMasterDbModel {
    pub id: i64,
    /// Base64 PBKDF2-SHA-512 hash used only to verify the master password.
    pub password_hash: String,
    /// Base64 random salt (32 bytes).
    pub salt: String,
    /// PBKDF2 iteration count used when the vault was created.
    pub iterations: i64,
    pub created_at: i64,
}

impl VaultMasterDbModel {
    pub fn new(password_hash: String, salt: String, iterations: u32) -> Self {
        Self {
            id: 1,
            password_hash,
            salt,
            iterations: i64::from(iterations),
            created_at: crate::database::time::now_ms(),
        }
    }
}

impl std::fmt::Debug for VaultMasterDbModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultMasterDbModel")
            .field("id", &self.id)
            .field("iterations", &self.iterations)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
