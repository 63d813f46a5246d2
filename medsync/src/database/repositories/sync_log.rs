//! Sync attempt log repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{SyncLogDbModel, SyncLogStatus};

#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    /// Insert a new attempt row (normally `running`).
    async fn create(&self, log: &SyncLogDbModel) -> Result<()>;

    /// Move a `running` row to a terminal status.
    ///
    /// Returns `false` if the row was not `running` anymore; a row is
    /// finished at most once.
    async fn finish(
        &self,
        id: &str,
        status: SyncLogStatus,
        records_imported: i64,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Fail every row still `running`. Returns how many were changed.
    async fn fail_running(&self, error_message: &str) -> Result<u64>;

    async fn get(&self, id: &str) -> Result<Option<SyncLogDbModel>>;

    /// Most recent attempts for a credential, newest first.
    async fn list_for_credential(
        &self,
        credential_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncLogDbModel>>;
}

pub struct SqlxSyncLogRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxSyncLogRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl SyncLogRepository for SqlxSyncLogRepository {
    async fn create(&self, log: &SyncLogDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portal_sync_log (
                id, credential_id, sync_started, sync_completed,
                status, records_imported, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.credential_id)
        .bind(log.sync_started)
        .bind(log.sync_completed)
        .bind(&log.status)
        .bind(log.records_imported)
        .bind(&log.error_message)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn finish(
        &self,
        id: &str,
        status: SyncLogStatus,
        records_imported: i64,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE portal_sync_log
            SET status = ?, sync_completed = ?, records_imported = ?, error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(crate::database::time::now_ms())
        .bind(records_imported)
        .bind(error_message)
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_running(&self, error_message: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE portal_sync_log
            SET status = 'failed', sync_completed = ?, error_message = ?
            WHERE status = 'running'
            "#,
        )
        .bind(crate::database::time::now_ms())
        .bind(error_message)
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: &str) -> Result<Option<SyncLogDbModel>> {
        let log =
            sqlx::query_as::<_, SyncLogDbModel>("SELECT * FROM portal_sync_log WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(log)
    }

    async fn list_for_credential(
        &self,
        credential_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncLogDbModel>> {
        let logs = sqlx::query_as::<_, SyncLogDbModel>(
            r#"
            SELECT * FROM portal_sync_log
            WHERE credential_id = ?
            ORDER BY sync_started DESC
            LIMIT ?
            "#,
        )
        .bind(credential_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::CredentialDbModel;
    use crate::database::repositories::{CredentialRepository, SqlxCredentialRepository};
    use crate::database::test_support::setup_test_db;

    #[tokio::test]
    async fn test_finish_is_single_transition() {
        let (_dir, pool) = setup_test_db().await;
        let credentials = SqlxCredentialRepository::new(pool.clone(), pool.clone());
        let credential = CredentialDbModel::new(
            "Epic",
            "epic",
            None,
            "u".into(),
            "p".into(),
            "none",
            None,
            None,
        );
        credentials.create(&credential).await.unwrap();

        let repo = SqlxSyncLogRepository::new(pool.clone(), pool);
        let log = SyncLogDbModel::started(&credential.id);
        repo.create(&log).await.unwrap();

        assert!(
            repo.finish(&log.id, SyncLogStatus::Success, 7, None)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .finish(&log.id, SyncLogStatus::Failed, 0, Some("late"))
                .await
                .unwrap()
        );

        let stored = repo.get(&log.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(SyncLogStatus::Success));
        assert_eq!(stored.records_imported, 7);
        assert!(stored.sync_completed.is_some());
        assert!(stored.error_message.is_none());

        let listed = repo.list_for_credential(&credential.id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_running_leaves_finished_rows() {
        let (_dir, pool) = setup_test_db().await;
        let credentials = SqlxCredentialRepository::new(pool.clone(), pool.clone());
        let credential = CredentialDbModel::new(
            "CareSpace",
            "carespace",
            None,
            "u".into(),
            "p".into(),
            "none",
            None,
            None,
        );
        credentials.create(&credential).await.unwrap();
        let repo = SqlxSyncLogRepository::new(pool.clone(), pool);

        let done = SyncLogDbModel::started(&credential.id);
        repo.create(&done).await.unwrap();
        repo.finish(&done.id, SyncLogStatus::Success, 3, None)
            .await
            .unwrap();
        let stuck = SyncLogDbModel::started(&credential.id);
        repo.create(&stuck).await.unwrap();

        assert_eq!(repo.fail_running("interrupted").await.unwrap(), 1);

        let stuck = repo.get(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status(), Some(SyncLogStatus::Failed));
        assert_eq!(stuck.error_message.as_deref(), Some("interrupted"));
        let done = repo.get(&done.id).await.unwrap().unwrap();
        assert_eq!(done.status(), Some(SyncLogStatus::Success));
        assert_eq!(done.records_imported, 3);
    }
}
