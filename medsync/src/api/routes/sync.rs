//! Sync trigger and history routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::SyncLogDbModel;
use crate::sync::SyncOutcome;

const DEFAULT_LOG_LIMIT: i64 = 20;
const MAX_LOG_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{credential_id}", post(sync_portal))
        .route("/{credential_id}/logs", get(list_logs))
}

/// Waits for the attempt. A client that disconnects early does not cancel it;
/// the outcome is still recorded in the sync log.
async fn sync_portal(
    State(state): State<AppState>,
    Path(credential_id): Path<String>,
) -> ApiResult<Json<SyncOutcome>> {
    Ok(Json(state.orchestrator.sync_portal(&credential_id).await?))
}

async fn list_logs(
    State(state): State<AppState>,
    Path(credential_id): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<SyncLogDbModel>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    Ok(Json(
        state.orchestrator.list_logs(&credential_id, limit).await?,
    ))
}
