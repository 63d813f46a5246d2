//! API route modules.
//!
//! Organizes routes by resource type.

pub mod credentials;
pub mod fhir;
pub mod health;
pub mod logging;
pub mod sync;
pub mod vault;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/vault", vault::router())
        .nest("/api/credentials", credentials::router())
        .nest("/api/sync", sync::router())
        .nest("/api/fhir", fhir::router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .with_state(state)
}
