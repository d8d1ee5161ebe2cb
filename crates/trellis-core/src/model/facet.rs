//! Facet - a saved grouping over the graph
//!
//! Facets are lightweight: no soft delete, no sync. The `query` field holds
//! a serialized filter the caller interprets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved grouping/filter definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facet {
    pub id: String,
    pub name: String,
    pub facet_type: Option<String>,
    /// Serialized filter expression, opaque to the store
    pub query: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Facet {
    /// Create a facet with a generated id and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            facet_type: None,
            query: None,
            sort_order: 0,
            created_at: now,
            modified_at: now,
        }
    }
}
