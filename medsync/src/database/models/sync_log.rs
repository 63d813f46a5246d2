//! Sync attempt log model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row per sync attempt. Append-only: rows are created `running` and
/// moved exactly once to a terminal status.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncLogDbModel {
    pub id: String,
    pub credential_id: String,
    /// Unix epoch milliseconds when the attempt started
    pub sync_started: i64,
    /// Unix epoch milliseconds when the attempt reached a terminal status
    pub sync_completed: Option<i64>,
    /// running, success, failed
    pub status: String,
    pub records_imported: i64,
    pub error_message: Option<String>,
}

impl SyncLogDbModel {
    /// A new `running` attempt for a credential, started now.
    pub fn started(credential_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            credential_id: credential_id.into(),
            sync_started: crate::database::time::now_ms(),
            sync_completed: None,
            status: SyncLogStatus::Running.as_str().to_string(),
            records_imported: 0,
            error_message: None,
        }
    }

    pub fn status(&self) -> Option<SyncLogStatus> {
        SyncLogStatus::parse(&self.status)
    }
}

/// Sync attempt status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncLogStatus {
    Running,
    Success,
    Failed,
}

impl SyncLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_row_is_running() {
        let log = SyncLogDbModel::started("cred-1");
        assert_eq!(log.status(), Some(SyncLogStatus::Running));
        assert!(log.sync_completed.is_none());
        assert_eq!(log.records_imported, 0);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            SyncLogStatus::Running,
            SyncLogStatus::Success,
            SyncLogStatus::Failed,
        ] {
            assert_eq!(SyncLogStatus::parse(status.as_str()), Some(status));
            assert_eq!(status.to_string(), status.as_str());
        }
        assert!(!SyncLogStatus::Running.is_terminal());
        assert!(SyncLogStatus::Failed.is_terminal());
    }
}
