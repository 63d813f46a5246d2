//! Sync orchestration.
//!
//! [`SyncOrchestrator::sync_portal`] is the single entry point: it checks out
//! the vault key, loads and decrypts the credential, runs the matching
//! [`PortalConnector`] and records the attempt.

mod connector;
mod error;
mod orchestrator;
mod types;

pub use connector::PortalConnector;
pub use error::{ErrorKind, SyncError};
pub(crate) use error::vault_kind;
pub use orchestrator::SyncOrchestrator;
pub use types::{ConnectorResult, SummaryStatus, SyncOutcome, SyncSummary};
