//! SMART authorization state and token repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{OAuthStateDbModel, OAuthTokenDbModel};

#[async_trait]
pub trait OAuthRepository: Send + Sync {
    /// Store a pending state, replacing any earlier one for the same credential.
    async fn upsert_state(&self, state: &OAuthStateDbModel) -> Result<()>;

    async fn find_state(&self, state: &str) -> Result<Option<OAuthStateDbModel>>;

    /// Delete and return the pending row for `state`.
    ///
    /// Single statement, so of two callers racing on the same state at most
    /// one gets the row.
    async fn take_state(&self, state: &str) -> Result<Option<OAuthStateDbModel>>;

    /// Delete every state that expired before `now_ms`.
    async fn purge_expired_states(&self, now_ms: i64) -> Result<u64>;

    /// Insert or replace the token row for a credential.
    async fn upsert_token(&self, token: &OAuthTokenDbModel) -> Result<()>;

    async fn get_token(&self, credential_id: &str) -> Result<Option<OAuthTokenDbModel>>;

    /// Delete the token row. Returns `false` if there was none.
    async fn delete_token(&self, credential_id: &str) -> Result<bool>;
}

pub struct SqlxOAuthRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxOAuthRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl OAuthRepository for SqlxOAuthRepository {
    async fn upsert_state(&self, state: &OAuthStateDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fhir_oauth_state (credential_id, state, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(credential_id) DO UPDATE SET
                state = excluded.state,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at
            "#,
        )
        .bind(&state.credential_id)
        .bind(&state.state)
        .bind(state.expires_at)
        .bind(state.created_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn find_state(&self, state: &str) -> Result<Option<OAuthStateDbModel>> {
        let row = sqlx::query_as::<_, OAuthStateDbModel>(
            "SELECT * FROM fhir_oauth_state WHERE state = ?",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn take_state(&self, state: &str) -> Result<Option<OAuthStateDbModel>> {
        let row = sqlx::query_as::<_, OAuthStateDbModel>(
            "DELETE FROM fhir_oauth_state WHERE state = ? RETURNING *",
        )
        .bind(state)
        .fetch_optional(&self.write_pool)
        .await?;
        Ok(row)
    }

    async fn purge_expired_states(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM fhir_oauth_state WHERE expires_at < ?")
            .bind(now_ms)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_token(&self, token: &OAuthTokenDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fhir_tokens (
                credential_id, access_token, refresh_token, patient_id,
                expires_at, scope, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(credential_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                patient_id = excluded.patient_id,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&token.credential_id)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.patient_id)
        .bind(token.expires_at)
        .bind(&token.scope)
        .bind(token.created_at)
        .bind(token.updated_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn get_token(&self, credential_id: &str) -> Result<Option<OAuthTokenDbModel>> {
        let token = sqlx::query_as::<_, OAuthTokenDbModel>(
            "SELECT * FROM fhir_tokens WHERE credential_id = ?",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn delete_token(&self, credential_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM fhir_tokens WHERE credential_id = ?")
            .bind(credential_id)
            .execute(&self.write_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
