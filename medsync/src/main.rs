use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use medsync::api::{ApiServer, AppState};
use medsync::config::AppConfig;
use medsync::connectors::browser::{BrowserConnector, SessionCache, WebDriverLauncher};
use medsync::connectors::fhir::{FhirConnector, ReqwestFhirTransport, SmartFhirClient};
use medsync::connectors::http::build_http_client;
use medsync::credentials::{CredentialService, PortalType};
use medsync::database::{
    self,
    repositories::{
        SqlxCredentialRepository, SqlxOAuthRepository, SqlxRecordStore, SqlxSyncLogRepository,
        SqlxVaultRepository,
    },
};
use medsync::logging;
use medsync::sync::SyncOrchestrator;
use medsync::vault::{VaultHandle, VaultService};

const FHIR_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    let log_dir = config.log_dir.to_string_lossy().into_owned();
    let (logging_config, _log_guard) = logging::init_logging(&log_dir)?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;
    let write_pool = database::init_write_pool(&config.database_url).await?;

    // Every process starts locked; the master password is never persisted.
    let vault_handle = VaultHandle::new();
    let vault = Arc::new(VaultService::new(
        Arc::new(SqlxVaultRepository::new(pool.clone(), write_pool.clone())),
        vault_handle.clone(),
    ));

    let credential_repo = Arc::new(SqlxCredentialRepository::new(
        pool.clone(),
        write_pool.clone(),
    ));
    let credentials = Arc::new(CredentialService::new(
        credential_repo.clone(),
        vault_handle.clone(),
    ));
    let records = Arc::new(SqlxRecordStore::new(write_pool.clone()));

    if config.fhir.client_id.is_none() {
        tracing::warn!("FHIR_CLIENT_ID is not set; SMART on FHIR authorization is disabled");
    }
    let fhir = Arc::new(SmartFhirClient::new(
        config.fhir.clone(),
        Arc::new(ReqwestFhirTransport::new(build_http_client(
            FHIR_REQUEST_TIMEOUT,
        ))),
        Arc::new(SqlxOAuthRepository::new(pool.clone(), write_pool.clone())),
        vault_handle.clone(),
    ));

    let browser = BrowserConnector::new(
        PortalType::Carespace,
        Arc::new(WebDriverLauncher::new(config.browser.clone())),
        records.clone(),
        SessionCache::new(config.browser.session_cache_dir.clone()),
        config.browser.max_lab_reports,
    );

    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            credential_repo,
            Arc::new(SqlxSyncLogRepository::new(pool.clone(), write_pool)),
            vault_handle,
        )
        .with_connector(Arc::new(FhirConnector::new(fhir.clone(), records)))
        .with_connector(Arc::new(browser)),
    );
    orchestrator.recover_interrupted().await?;

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.clone());

    let state = AppState::new(vault, credentials, orchestrator, fhir)
        .with_logging_config(logging_config);
    let server = ApiServer::new(config.api.clone(), state).with_cancel_token(shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl_c signal received");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    tracing::info!("medsync initialized successfully");
    server.run().await?;

    pool.close().await;
    Ok(())
}
