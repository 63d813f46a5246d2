//! Portal connectors.

pub mod browser;
pub mod fhir;
pub mod http;
