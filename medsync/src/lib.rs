//! medsync library crate.
//!
//! Clinical data synchronization for a personal health record: an encrypted
//! credential vault, a sync orchestrator and connectors for SMART on FHIR
//! APIs and browser-only patient portals.

pub mod api;
pub mod config;
pub mod connectors;
pub mod credentials;
pub mod database;
pub mod error;
pub mod logging;
pub mod sync;
pub mod vault;

pub use error::{Error, Result};
