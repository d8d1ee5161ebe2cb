//! Sync transport capability
//!
//! The store replicates against any remote record store that can host a
//! named zone of `Node`/`Edge` records and hand back incremental change
//! tokens. Implementations must make `ensure_zone` and `subscribe`
//! idempotent; `modify_records` reports per-record outcomes so a partial
//! batch failure does not lose the successes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::model::{Edge, Node};

/// Transport-level error
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The network is unavailable; the sync state machine parks in
    /// `Offline` instead of retrying
    #[error("network unavailable: {0}")]
    Offline(String),
    /// The remote rejected a request
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Anything else
    #[error("transport failure: {0}")]
    Other(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

impl From<TransportError> for StoreError {
    fn from(e: TransportError) -> Self {
        StoreError::SyncTransport(e.to_string())
    }
}

/// Which table a remote record mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Node,
    Edge,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Node => "Node",
            RecordType::Edge => "Edge",
        }
    }
}

/// Identity of a remote record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub record_type: RecordType,
    pub record_name: String,
}

impl RecordId {
    pub fn node(id: impl Into<String>) -> Self {
        Self {
            record_type: RecordType::Node,
            record_name: id.into(),
        }
    }

    pub fn edge(id: impl Into<String>) -> Self {
        Self {
            record_type: RecordType::Edge,
            record_name: id.into(),
        }
    }
}

/// A record as the transport sees it: a type, a name, and a JSON field map
/// carrying every attribute of the mirrored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_type: RecordType,
    pub record_name: String,
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    /// Encode a node, preserving its version.
    pub fn from_node(node: &Node) -> crate::error::Result<Self> {
        let Value::Object(fields) = serde_json::to_value(node)? else {
            return Err(StoreError::SyncTransport(
                "node did not serialize to an object".into(),
            ));
        };
        Ok(Self {
            record_type: RecordType::Node,
            record_name: node.id.clone(),
            fields,
        })
    }

    /// Encode an edge, preserving its version counters.
    pub fn from_edge(edge: &Edge) -> crate::error::Result<Self> {
        let Value::Object(fields) = serde_json::to_value(edge)? else {
            return Err(StoreError::SyncTransport(
                "edge did not serialize to an object".into(),
            ));
        };
        Ok(Self {
            record_type: RecordType::Edge,
            record_name: edge.id.clone(),
            fields,
        })
    }

    /// Decode the field map back into a node.
    pub fn to_node(&self) -> crate::error::Result<Node> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Decode the field map back into an edge.
    pub fn to_edge(&self) -> crate::error::Result<Edge> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// The record's version field, 0 when absent.
    pub fn version(&self) -> i64 {
        self.fields
            .get("version")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    pub fn id(&self) -> RecordId {
        RecordId {
            record_type: self.record_type,
            record_name: self.record_name.clone(),
        }
    }
}

/// How much of a record a save writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SavePolicy {
    /// Only fields that changed since the base record
    #[default]
    ChangedKeys,
    /// The full record
    AllKeys,
}

/// Per-record result of a batch modify
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record_name: String,
    pub error: Option<TransportError>,
}

impl RecordOutcome {
    pub fn ok(record_name: impl Into<String>) -> Self {
        Self {
            record_name: record_name.into(),
            error: None,
        }
    }

    pub fn failed(record_name: impl Into<String>, error: TransportError) -> Self {
        Self {
            record_name: record_name.into(),
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a batch modify
#[derive(Debug, Clone, Default)]
pub struct ModifyOutcome {
    pub saved: Vec<RecordOutcome>,
    pub deleted: Vec<RecordOutcome>,
}

/// One page of incremental changes from the zone
#[derive(Debug, Clone, Default)]
pub struct ZoneChanges {
    /// Created or modified records, in server-delivered order
    pub changed: Vec<RemoteRecord>,
    /// Records deleted on the server
    pub deleted: Vec<RecordId>,
    /// Cursor to resume from next time, when the server supplies one
    pub new_token: Option<Vec<u8>>,
}

/// Remote record store capability
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Create the zone if it does not exist. Idempotent.
    async fn ensure_zone(&self, zone: &str) -> TransportResult<()>;

    /// Subscribe to change notifications. Idempotent, optional; failures
    /// here do not abort a sync.
    async fn subscribe(&self, subscription_id: &str) -> TransportResult<()>;

    /// Save and delete records as one batch. `atomic = false` permits
    /// partial success; outcomes are reported per record.
    async fn modify_records(
        &self,
        zone: &str,
        saves: Vec<RemoteRecord>,
        deletes: Vec<RecordId>,
        policy: SavePolicy,
        atomic: bool,
    ) -> TransportResult<ModifyOutcome>;

    /// Fetch changes since `token` (everything when `None`).
    async fn fetch_zone_changes(
        &self,
        zone: &str,
        token: Option<Vec<u8>>,
    ) -> TransportResult<ZoneChanges>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_record_round_trip_preserves_version() {
        let mut node = Node::with_id("n1", "Remote me");
        node.version = 7;
        node.tags = vec!["a".into()];

        let record = RemoteRecord::from_node(&node).unwrap();
        assert_eq!(record.record_type, RecordType::Node);
        assert_eq!(record.record_name, "n1");
        assert_eq!(record.version(), 7);

        let decoded = record.to_node().unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn edge_record_round_trip() {
        let edge = Edge::new(crate::model::EdgeType::Nest, "a", "b").with_weight(2.0);
        let record = RemoteRecord::from_edge(&edge).unwrap();
        let decoded = record.to_edge().unwrap();
        assert_eq!(decoded, edge);
    }

    #[test]
    fn version_defaults_to_zero_when_absent() {
        let record = RemoteRecord {
            record_type: RecordType::Node,
            record_name: "x".into(),
            fields: Map::new(),
        };
        assert_eq!(record.version(), 0);
    }
}
