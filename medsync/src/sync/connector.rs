//! Connector seam between the orchestrator and portal-specific sync logic.

use async_trait::async_trait;

use super::{ConnectorResult, SyncError};
use crate::credentials::{PortalCredential, PortalType};
use crate::vault::VaultKey;

/// A portal-specific synchronizer.
///
/// Implementations import records through the dedup-on-insert store and
/// report how many rows were new.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    fn portal_type(&self) -> PortalType;

    /// Label used in summaries, e.g. `"Epic MyChart (FHIR)"`.
    fn label(&self) -> &'static str;

    /// Run one sync. `key` is the vault key checked out for this attempt and
    /// stays usable after the vault locks; connectors decrypt with it instead
    /// of going back to the vault handle.
    async fn sync(
        &self,
        credential: &PortalCredential,
        key: &VaultKey,
    ) -> Result<ConnectorResult, SyncError>;
}
