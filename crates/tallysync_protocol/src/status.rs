//! Sync status values observed by subscribers.

use serde::{Deserialize, Serialize};

/// State of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// No pass is running.
    Idle,
    /// A pass is running.
    Syncing,
    /// The last pass finished successfully.
    Completed,
    /// The last pass failed.
    Error,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns true if a new pass may start.
    ///
    /// `Completed` and `Error` are only held while a finishing pass notifies
    /// subscribers, so a new pass waits for `Idle`.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

/// Status snapshot delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Current state.
    pub status: SyncState,
    /// Time of the last successful pass, in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<u64>,
    /// Error of the last failed pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    /// Idle status carrying the last successful sync time.
    pub fn idle(last_sync: Option<u64>) -> Self {
        Self {
            status: SyncState::Idle,
            last_sync,
            error: None,
        }
    }

    /// Status emitted when a pass starts.
    pub fn syncing(last_sync: Option<u64>) -> Self {
        Self {
            status: SyncState::Syncing,
            last_sync,
            error: None,
        }
    }

    /// Status emitted when a pass succeeds.
    pub fn completed(last_sync: u64) -> Self {
        Self {
            status: SyncState::Completed,
            last_sync: Some(last_sync),
            error: None,
        }
    }

    /// Status emitted when a pass fails.
    pub fn error(message: impl Into<String>, last_sync: Option<u64>) -> Self {
        Self {
            status: SyncState::Error,
            last_sync,
            error: Some(message.into()),
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::idle(None)
    }
}

/// Metadata persisted after each successful pass under `syncStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Time of the last successful pass, in milliseconds since the epoch.
    pub last_sync: u64,
    /// Client platform (e.g. "ios", "web").
    pub platform: String,
    /// Client application version.
    pub version: String,
}


