//! SMART on FHIR connector.
//!
//! [`SmartFhirClient`] owns the three-phase OAuth flow (authorize, code
//! exchange, refresh) and Bundle pagination; [`FhirConnector`] runs the
//! per-resource searches and imports mapped records.

mod client;
mod connector;
mod error;
pub mod mapping;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{MAX_PAGES, REFRESH_MARGIN_MINUTES, SMART_SCOPES, STATE_TTL_MINUTES, SmartFhirClient};
pub use connector::{CTDNA_LOINC, FhirConnector};
pub use error::FhirError;
pub use transport::{FhirTransport, ReqwestFhirTransport};
pub use types::{AccessToken, AuthorizedToken, Bundle, BundleEntry, BundleLink, TokenResponse, TokenStatus};
