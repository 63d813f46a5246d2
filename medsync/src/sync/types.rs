//! Sync output contract.

use serde::Serialize;
use serde_json::{Map, Value};

/// Overall status of one connector run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum SummaryStatus {
    #[serde(rename = "Success")]
    #[strum(serialize = "Success")]
    Success,
    /// At least one section failed while others completed.
    #[serde(rename = "Partial Success")]
    #[strum(serialize = "Partial Success")]
    PartialSuccess,
    #[serde(rename = "Failed")]
    #[strum(serialize = "Failed")]
    Failed,
    /// Login reached a second-factor prompt; the user has to finish it.
    #[serde(rename = "MFA Required")]
    #[strum(serialize = "MFA Required")]
    MfaRequired,
    /// Portal type without an automated connector.
    #[serde(rename = "manual")]
    #[strum(serialize = "manual")]
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    /// Human readable connector label.
    pub connector: String,
    pub status: SummaryStatus,
    pub message: String,
    /// Per-category record counts and connector-specific extras.
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncSummary {
    pub fn new(
        connector: impl Into<String>,
        status: SummaryStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            connector: connector.into(),
            status,
            message: message.into(),
            details: Map::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// What a connector hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct ConnectorResult {
    pub records_imported: u64,
    pub summary: SyncSummary,
}

/// Result of one `sync_portal` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub records_imported: u64,
    pub summary: SyncSummary,
    pub sync_log_id: String,
}
