//! Node - the primary vertex of the property graph
//!
//! Each node carries a LATCH taxonomy of attributes:
//! - **L**ocation: coordinates and place names
//! - **A**lphabet: name, content, summary (searchable text)
//! - **T**ime: creation, modification, due/completed, event window
//! - **C**ategory: folder, tags, status
//! - **H**ierarchy: priority, importance, sort order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the property graph
///
/// Soft-deleted by default: a node is *active* iff `deleted_at` is `None`,
/// and every read API filters to active nodes unless told otherwise.
/// `version` increases on each mutating update; `sync_version` counts the
/// changes that still need replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier (caller-supplied or UUID v4)
    pub id: String,
    /// Free-form classification, defaults to "note"
    pub node_type: String,
    /// Display name (required)
    pub name: String,
    /// Body text
    pub content: Option<String>,
    /// Short abstract of the content
    pub summary: Option<String>,

    // ========== LATCH-L: Location ==========
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
    pub location_address: Option<String>,

    // ========== LATCH-T: Time ==========
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub event_start: Option<DateTime<Utc>>,
    pub event_end: Option<DateTime<Utc>>,

    // ========== LATCH-C: Category ==========
    pub folder: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: Option<String>,

    // ========== LATCH-H: Hierarchy ==========
    pub priority: Option<i64>,
    pub importance: Option<i64>,
    pub sort_order: Option<i64>,

    // ========== Provenance ==========
    /// Producing system (importer name, "sync", ...)
    pub source: Option<String>,
    /// Identifier within the producing system; `(source, source_id)` is
    /// unique when both are present
    pub source_id: Option<String>,
    pub source_url: Option<String>,

    // ========== Lifecycle ==========
    /// Soft-delete marker; `None` = active
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic version counter, starts at 1
    pub version: i64,

    // ========== Sync ==========
    /// Monotonic local change counter for replication
    pub sync_version: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub conflict_resolved_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Create a new active node with a generated id and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            node_type: "note".to_string(),
            name: name.into(),
            content: None,
            summary: None,
            latitude: None,
            longitude: None,
            location_name: None,
            location_address: None,
            created_at: now,
            modified_at: now,
            due_at: None,
            completed_at: None,
            event_start: None,
            event_end: None,
            folder: None,
            tags: vec![],
            status: None,
            priority: None,
            importance: None,
            sort_order: None,
            source: None,
            source_id: None,
            source_url: None,
            deleted_at: None,
            version: 1,
            sync_version: 1,
            last_synced_at: None,
            conflict_resolved_at: None,
        }
    }

    /// Create a node with a caller-supplied id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(name)
        }
    }

    /// Whether the node is active (not soft-deleted).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether this node still has changes awaiting replication.
    pub fn needs_sync(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced) => self.modified_at > synced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_defaults() {
        let node = Node::new("Groceries");
        assert!(!node.id.is_empty());
        assert_eq!(node.node_type, "note");
        assert_eq!(node.version, 1);
        assert_eq!(node.sync_version, 1);
        assert!(node.is_active());
        assert!(node.needs_sync());
    }

    #[test]
    fn needs_sync_tracks_modification() {
        let mut node = Node::new("n");
        node.last_synced_at = Some(node.modified_at);
        assert!(!node.needs_sync());

        node.modified_at = node.modified_at + chrono::Duration::seconds(1);
        assert!(node.needs_sync());
    }

    #[test]
    fn serde_uses_camel_case() {
        let node = Node::with_id("n1", "A");
        let json = serde_json::to_value(&node).unwrap();
        assert!(json.get("nodeType").is_some());
        assert!(json.get("syncVersion").is_some());
        assert!(json.get("node_type").is_none());
    }
}
