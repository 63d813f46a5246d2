//! Portal credential routes.
//!
//! Responses never contain secrets: usernames, passwords and TOTP seeds stay
//! encrypted at rest and are only decrypted inside a sync.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::credentials::{CredentialSummary, NewCredential};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_credentials).post(create_credential))
        .route("/{id}", get(get_credential).delete(delete_credential))
}

async fn list_credentials(State(state): State<AppState>) -> ApiResult<Json<Vec<CredentialSummary>>> {
    Ok(Json(state.credentials.list().await?))
}

async fn create_credential(
    State(state): State<AppState>,
    Json(request): Json<NewCredential>,
) -> ApiResult<(StatusCode, Json<CredentialSummary>)> {
    let created = state.credentials.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CredentialSummary>> {
    Ok(Json(state.credentials.get(&id).await?))
}

async fn delete_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.credentials.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
