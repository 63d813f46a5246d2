//! Vault master record repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::VaultMasterDbModel;

#[async_trait]
pub trait VaultRepository: Send + Sync {
    /// Load the master record, if the vault was set up.
    async fn get_master(&self) -> Result<Option<VaultMasterDbModel>>;

    /// Store the master record.
    ///
    /// Returns `false` when a master record already exists.
    async fn create_master(&self, master: &VaultMasterDbModel) -> Result<bool>;
}

pub struct SqlxVaultRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxVaultRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl VaultRepository for SqlxVaultRepository {
    async fn get_master(&self) -> Result<Option<VaultMasterDbModel>> {
        let master = sqlx::query_as::<_, VaultMasterDbModel>(
            "SELECT * FROM vault_master WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(master)
    }

    async fn create_master(&self, master: &VaultMasterDbModel) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO vault_master (id, password_hash, salt, iterations, created_at)
            VALUES (1, ?, ?, ?, ?)
            "#,
        )
        .bind(&master.password_hash)
        .bind(&master.salt)
        .bind(master.iterations)
        .bind(master.created_at)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::setup_test_db;

    #[tokio::test]
    async fn test_master_is_written_once() {
        let (_dir, pool) = setup_test_db().await;
        let repo = SqlxVaultRepository::new(pool.clone(), pool);

        assert!(repo.get_master().await.unwrap().is_none());

        let first = VaultMasterDbModel::new("hash-a".into(), "salt-a".into(), 1000);
        assert!(repo.create_master(&first).await.unwrap());

        let second = VaultMasterDbModel::new("hash-b".into(), "salt-b".into(), 1000);
        assert!(!repo.create_master(&second).await.unwrap());

        let stored = repo.get_master().await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-a");
        assert_eq!(stored.iterations, 1000);
    }
}
