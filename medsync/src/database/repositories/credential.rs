//! Portal credential repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{CredentialDbModel, CredentialSyncUpdate};
use crate::{Error, Result};

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn create(&self, credential: &CredentialDbModel) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<CredentialDbModel>>;

    /// All credentials, newest first.
    async fn list(&self) -> Result<Vec<CredentialDbModel>>;

    /// Delete a credential. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Write the last-sync summary after an attempt finished.
    async fn record_sync_result(&self, id: &str, update: &CredentialSyncUpdate) -> Result<()>;
}

pub struct SqlxCredentialRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxCredentialRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl CredentialRepository for SqlxCredentialRepository {
    async fn create(&self, credential: &CredentialDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portal_credentials (
                id, service_name, portal_type, base_url,
                username_encrypted, password_encrypted, mfa_method,
                totp_secret_encrypted, notes_encrypted,
                last_sync, last_sync_status, last_sync_records, last_sync_error,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.service_name)
        .bind(&credential.portal_type)
        .bind(&credential.base_url)
        .bind(&credential.username_encrypted)
        .bind(&credential.password_encrypted)
        .bind(&credential.mfa_method)
        .bind(&credential.totp_secret_encrypted)
        .bind(&credential.notes_encrypted)
        .bind(credential.last_sync)
        .bind(&credential.last_sync_status)
        .bind(credential.last_sync_records)
        .bind(&credential.last_sync_error)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CredentialDbModel>> {
        let credential = sqlx::query_as::<_, CredentialDbModel>(
            "SELECT * FROM portal_credentials WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(credential)
    }

    async fn list(&self) -> Result<Vec<CredentialDbModel>> {
        let credentials = sqlx::query_as::<_, CredentialDbModel>(
            "SELECT * FROM portal_credentials ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(credentials)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM portal_credentials WHERE id = ?")
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_sync_result(&self, id: &str, update: &CredentialSyncUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portal_credentials
            SET last_sync = ?,
                last_sync_status = ?,
                last_sync_records = ?,
                last_sync_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.finished_at)
        .bind(update.status.as_str())
        .bind(update.records_imported)
        .bind(&update.error_message)
        .bind(crate::database::time::now_ms())
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Credential", id));
        }
        Ok(())
    }
}
