//! Vault lifecycle routes.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::vault::VaultStatus;

/// Master password body for setup and unlock.
#[derive(Deserialize)]
pub struct MasterPasswordRequest {
    pub password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/setup", post(setup))
        .route("/unlock", post(unlock))
        .route("/lock", post(lock))
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<VaultStatus>> {
    Ok(Json(state.vault.status().await?))
}

async fn setup(
    State(state): State<AppState>,
    Json(request): Json<MasterPasswordRequest>,
) -> ApiResult<Json<VaultStatus>> {
    let password = Zeroizing::new(request.password);
    state.vault.setup(&password).await?;
    Ok(Json(state.vault.status().await?))
}

async fn unlock(
    State(state): State<AppState>,
    Json(request): Json<MasterPasswordRequest>,
) -> ApiResult<Json<VaultStatus>> {
    let password = Zeroizing::new(request.password);
    state.vault.unlock(&password).await?;
    Ok(Json(state.vault.status().await?))
}

/// Drops the in-memory key. Syncs already running keep theirs.
async fn lock(State(state): State<AppState>) -> ApiResult<Json<VaultStatus>> {
    state.vault.lock();
    Ok(Json(state.vault.status().await?))
}
