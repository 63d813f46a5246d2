//! SMART on FHIR authorization routes.
//!
//! `authorize` sends the browser to the identity provider; the provider
//! comes back to `callback`, which always redirects to the app root with
//! either `fhir_success=true&credential_id=<id>` or `error=<message>`.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Redirect,
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::connectors::fhir::TokenStatus;
use crate::credentials::{ConnectorKind, PortalType};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub success: bool,
    /// False when no tokens were stored.
    pub revoked: bool,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize/{credential_id}", get(authorize))
        .route("/callback", get(callback))
        .route("/status/{credential_id}", get(status))
        .route("/revoke/{credential_id}", delete(revoke))
}

async fn authorize(
    State(state): State<AppState>,
    Path(credential_id): Path<String>,
) -> ApiResult<Redirect> {
    let credential = state.credentials.get(&credential_id).await?;
    let is_fhir = PortalType::parse(&credential.portal_type)
        .is_some_and(|t| t.connector_kind() == ConnectorKind::Fhir);
    if !is_fhir {
        return Err(ApiError::validation(format!(
            "Portal type {} does not use SMART on FHIR",
            credential.portal_type
        )));
    }

    let url = state.fhir.authorization_url(&credential_id).await?;
    info!(credential_id = %credential_id, "Redirecting to FHIR authorization");
    Ok(Redirect::to(&url))
}

async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Redirect> {
    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        warn!(error = %message, "Identity provider returned an error");
        return Ok(error_redirect(&message));
    }

    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(ApiError::bad_request(
            "Missing required parameters (code or state)",
        ));
    };

    match state.fhir.exchange_code_for_token(&code, &oauth_state).await {
        Ok(token) => Ok(Redirect::to(&format!(
            "/?fhir_success=true&credential_id={}",
            urlencoding::encode(&token.credential_id)
        ))),
        Err(e) => {
            warn!(kind = %e.kind(), error = %e, "FHIR callback failed");
            Ok(error_redirect(&e.to_string()))
        }
    }
}

fn error_redirect(message: &str) -> Redirect {
    Redirect::to(&format!("/?error={}", urlencoding::encode(message)))
}

async fn status(
    State(state): State<AppState>,
    Path(credential_id): Path<String>,
) -> ApiResult<Json<TokenStatus>> {
    Ok(Json(state.fhir.status(&credential_id).await?))
}

async fn revoke(
    State(state): State<AppState>,
    Path(credential_id): Path<String>,
) -> ApiResult<Json<RevokeResponse>> {
    let revoked = state.fhir.revoke(&credential_id).await?;
    let message = if revoked {
        "Authorization revoked successfully"
    } else {
        "No authorization to revoke"
    };
    Ok(Json(RevokeResponse {
        success: true,
        revoked,
        message: message.to_string(),
    }))
}
