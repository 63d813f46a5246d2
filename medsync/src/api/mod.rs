//! REST API server module.
//!
//! HTTP endpoints for the vault, portal credentials, sync runs and the
//! SMART on FHIR authorization flow.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
