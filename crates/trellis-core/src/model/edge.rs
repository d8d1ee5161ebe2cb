//! Edge - a directed or undirected relationship between two nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The relationship kinds an edge can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Generic reference between two nodes
    #[default]
    Link,
    /// Containment / parent-child
    Nest,
    /// Ordered succession (uses `sequence_order`)
    Sequence,
    /// Computed or inferred similarity
    Affinity,
}

impl EdgeType {
    /// Storage string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Link => "LINK",
            EdgeType::Nest => "NEST",
            EdgeType::Sequence => "SEQUENCE",
            EdgeType::Affinity => "AFFINITY",
        }
    }

    /// Parse from the storage string; unknown kinds fall back to `Link`.
    pub fn parse(s: &str) -> Self {
        match s {
            "NEST" => EdgeType::Nest,
            "SEQUENCE" => EdgeType::Sequence,
            "AFFINITY" => EdgeType::Affinity,
            _ => EdgeType::Link,
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A relationship between two nodes
///
/// Edges are hard-deleted (cheap to recreate, and it keeps the sync protocol
/// simple). `(source_id, target_id, edge_type)` is unique. Undirected edges
/// are traversable from both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub edge_type: EdgeType,
    pub source_id: String,
    pub target_id: String,
    pub label: Option<String>,
    /// Traversal cost for weighted paths, defaults to 1.0
    pub weight: f64,
    /// Directed edges traverse forward only
    pub directed: bool,
    /// Position within a `Sequence` relationship
    pub sequence_order: Option<i64>,
    /// Communication channel that produced this edge (mail, chat, ...)
    pub channel: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub subject: Option<String>,
    /// Monotonic local change counter for replication
    pub sync_version: i64,
    /// `sync_version` value at the last successful push; local bookkeeping,
    /// absent from foreign records
    #[serde(default)]
    pub last_synced_version: i64,
}

impl Edge {
    /// Create a directed edge of the given kind with weight 1.0.
    pub fn new(edge_type: EdgeType, source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            edge_type,
            source_id: source_id.into(),
            target_id: target_id.into(),
            label: None,
            weight: 1.0,
            directed: true,
            sequence_order: None,
            channel: None,
            timestamp: None,
            subject: None,
            sync_version: 1,
            last_synced_version: 0,
        }
    }

    /// Builder-style weight override.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Builder-style direction override.
    pub fn undirected(mut self) -> Self {
        self.directed = false;
        self
    }

    /// Whether this edge still has changes awaiting replication.
    pub fn needs_sync(&self) -> bool {
        self.sync_version > self.last_synced_version
    }
}
