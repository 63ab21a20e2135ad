use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StateError;

/// Outcome of a sync attempt, shared by jobs and the connector's last sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    InProgress,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_progress" => Ok(SyncStatus::InProgress),
            "completed" => Ok(SyncStatus::Completed),
            "error" => Ok(SyncStatus::Error),
            other => Err(StateError::UnknownStatus {
                kind: "sync status",
                value: other.to_string(),
            }),
        }
    }
}

/// A single sync attempt for a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub id: Uuid,
    pub connector_id: String,
    pub status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub indexed_document_count: u64,
    pub deleted_document_count: u64,
    pub error: Option<String>,
    pub worker_hostname: Option<String>,
}

impl SyncJob {
    pub fn is_in_progress(&self) -> bool {
        self.status == SyncStatus::InProgress
    }
}

/// What a finished sync reports back to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCompletion {
    pub indexed: u64,
    pub deleted: u64,
    pub error: Option<String>,
}

impl SyncCompletion {
    pub fn succeeded(indexed: u64, deleted: u64) -> Self {
        Self {
            indexed,
            deleted,
            error: None,
        }
    }

    pub fn failed(indexed: u64, deleted: u64, error: impl Into<String>) -> Self {
        Self {
            indexed,
            deleted,
            error: Some(error.into()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.error.is_some() {
            SyncStatus::Error
        } else {
            SyncStatus::Completed
        }
    }
}
