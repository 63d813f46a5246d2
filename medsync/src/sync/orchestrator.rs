//! Sync orchestrator.
//!
//! Runs one sync attempt for a credential: decrypts it, dispatches to the
//! connector registered for its portal type and records the attempt in
//! `portal_sync_log` and on the credential row.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, instrument, warn};

use super::{ConnectorResult, PortalConnector, SummaryStatus, SyncError, SyncOutcome, SyncSummary};
use crate::credentials::{ConnectorKind, PortalCredential, PortalType};
use crate::database::models::{
    CredentialDbModel, CredentialSyncUpdate, SyncLogDbModel, SyncLogStatus,
};
use crate::database::repositories::{CredentialRepository, SyncLogRepository};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::vault::{VaultHandle, VaultKey};

/// Error recorded on attempts that were still `running` at startup.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: the server stopped before the sync finished";

type ConnectorMap = HashMap<PortalType, Arc<dyn PortalConnector>>;

pub struct SyncOrchestrator {
    credentials: Arc<dyn CredentialRepository>,
    sync_logs: Arc<dyn SyncLogRepository>,
    vault: VaultHandle,
    connectors: Arc<ConnectorMap>,
    /// Per-credential in-flight guards
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        sync_logs: Arc<dyn SyncLogRepository>,
        vault: VaultHandle,
    ) -> Self {
        Self {
            credentials,
            sync_logs,
            vault,
            connectors: Arc::new(HashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Register the connector for a portal type, replacing any earlier one.
    pub fn register_connector(&mut self, connector: Arc<dyn PortalConnector>) {
        Arc::make_mut(&mut self.connectors).insert(connector.portal_type(), connector);
    }

    pub fn with_connector(mut self, connector: Arc<dyn PortalConnector>) -> Self {
        self.register_connector(connector);
        self
    }

    /// Mark attempts left `running` by a previous process as failed.
    ///
    /// Call once at startup, before any sync is accepted.
    pub async fn recover_interrupted(&self) -> Result<u64, SyncError> {
        let recovered = self.sync_logs.fail_running(INTERRUPTED_MESSAGE).await?;
        if recovered > 0 {
            warn!(recovered, "Marked interrupted sync attempts as failed");
        }
        Ok(recovered)
    }

    /// Synchronize one credential.
    ///
    /// Fails fast with [`SyncError::Vault`] when the vault is locked and with
    /// [`SyncError::AlreadyRunning`] when the credential is already syncing;
    /// neither writes a log row. Once the credential is loaded, exactly one
    /// log row is written and moved to a terminal status.
    ///
    /// The attempt runs on its own task. Dropping the returned future does
    /// not cancel it: the log row, the credential status and the in-flight
    /// guard are still settled when the connector finishes.
    #[instrument(skip(self), fields(credential_id = %credential_id))]
    pub async fn sync_portal(&self, credential_id: &str) -> Result<SyncOutcome, SyncError> {
        let key = self.vault.checkout()?;

        let lock = self
            .in_flight
            .entry(credential_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning(credential_id.to_string()))?;

        let attempt = SyncAttempt {
            credential_id: credential_id.to_string(),
            credentials: self.credentials.clone(),
            sync_logs: self.sync_logs.clone(),
            connectors: self.connectors.clone(),
        };
        let in_flight = self.in_flight.clone();

        let task = tokio::spawn(
            async move {
                let result = attempt.run(&key).await;
                drop(guard);
                in_flight.remove_if(&attempt.credential_id, |_, m| Arc::strong_count(m) == 1);
                result
            }
            .in_current_span(),
        );

        task.await
            .map_err(|e| SyncError::Application(format!("sync task failed: {e}")))?
    }

    /// Recent attempts for a credential, newest first.
    pub async fn list_logs(
        &self,
        credential_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncLogDbModel>, SyncError> {
        Ok(self
            .sync_logs
            .list_for_credential(credential_id, limit)
            .await?)
    }
}

/// Everything one attempt needs, owned so it can outlive the caller.
struct SyncAttempt {
    credential_id: String,
    credentials: Arc<dyn CredentialRepository>,
    sync_logs: Arc<dyn SyncLogRepository>,
    connectors: Arc<ConnectorMap>,
}

impl SyncAttempt {
    async fn run(&self, key: &VaultKey) -> Result<SyncOutcome, SyncError> {
        let credential_id = self.credential_id.as_str();
        let model = self
            .credentials
            .get(credential_id)
            .await?
            .ok_or_else(|| SyncError::CredentialNotFound(credential_id.to_string()))?;

        let log = SyncLogDbModel::started(credential_id);
        self.sync_logs.create(&log).await?;
        info!(
            portal_type = %model.portal_type,
            service = %model.service_name,
            sync_log_id = %log.id,
            "Starting sync"
        );

        match self.dispatch(&model, key).await {
            Ok(result) => {
                let records = i64::try_from(result.records_imported).unwrap_or(i64::MAX);
                self.finish(&log.id, SyncLogStatus::Success, records, None)
                    .await?;
                info!(
                    records = result.records_imported,
                    status = %result.summary.status,
                    "Sync complete"
                );
                Ok(SyncOutcome {
                    success: true,
                    records_imported: result.records_imported,
                    summary: result.summary,
                    sync_log_id: log.id,
                })
            }
            Err(err) => {
                let message = err.to_string();
                warn!(kind = %err.kind(), error = %message, "Sync failed");
                if let Err(write_err) = self
                    .finish(&log.id, SyncLogStatus::Failed, 0, Some(message))
                    .await
                {
                    error!(error = %write_err, "Failed to record failed sync attempt");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        model: &CredentialDbModel,
        key: &VaultKey,
    ) -> Result<ConnectorResult, SyncError> {
        let credential = PortalCredential::decrypt(model, key)?;

        if credential.portal_type.connector_kind() == ConnectorKind::Manual {
            return Ok(manual_result(&credential));
        }

        let connector = self.connectors.get(&credential.portal_type).ok_or_else(|| {
            SyncError::UnsupportedPortalType(format!(
                "{} (no connector registered)",
                credential.portal_type
            ))
        })?;
        connector.sync(&credential, key).await
    }

    async fn finish(
        &self,
        sync_log_id: &str,
        status: SyncLogStatus,
        records_imported: i64,
        error_message: Option<String>,
    ) -> Result<(), SyncError> {
        let update = CredentialSyncUpdate {
            status,
            records_imported,
            error_message,
            finished_at: now_ms(),
        };

        retry_on_sqlite_busy("sync_log_finish", || {
            self.sync_logs.finish(
                sync_log_id,
                update.status,
                update.records_imported,
                update.error_message.as_deref(),
            )
        })
        .await?;
        retry_on_sqlite_busy("credential_record_sync", || {
            self.credentials
                .record_sync_result(&self.credential_id, &update)
        })
        .await?;
        Ok(())
    }
}

fn manual_result(credential: &PortalCredential) -> ConnectorResult {
    let connector = match credential.portal_type {
        PortalType::Cerner => "Cerner Health",
        PortalType::Athena => "Athenahealth",
        _ => "Generic Portal",
    };
    ConnectorResult {
        records_imported: 0,
        summary: SyncSummary::new(
            connector,
            SummaryStatus::Manual,
            format!(
                "No automated connector for {}; enter records manually",
                credential.service_name
            ),
        )
        .with_detail("recordsImported", 0),
    }
}
