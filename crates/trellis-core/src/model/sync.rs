//! Sync state - singleton bookkeeping row for the replication layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id of the singleton sync-state record
pub const SYNC_STATE_ID: &str = "default";

/// Replication bookkeeping, persisted as a single row
///
/// `last_sync_token` is an opaque cursor supplied by the transport; the
/// store never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub id: String,
    /// Serialized server cursor for incremental pull
    pub last_sync_token: Option<Vec<u8>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_changes: i64,
    pub conflict_count: i64,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            id: SYNC_STATE_ID.to_string(),
            last_sync_token: None,
            last_sync_at: None,
            pending_changes: 0,
            conflict_count: 0,
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
        }
    }
}

/// Where the sync state machine currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// No sync in flight
    #[default]
    Idle,
    /// A sync pass is running; re-entry is a no-op
    Syncing,
    /// The last pass failed; `sync_state.last_error` has the detail
    Error,
    /// The transport reported the network as unavailable
    Offline,
}
