//! Row Codec
//!
//! Bidirectional mapping between storage rows and typed records. Timestamps
//! are RFC 3339 TEXT, tags are a JSON array, edge kinds round-trip through
//! their storage strings. Decoding tolerates any row shape the schema can
//! produce: unknown columns are ignored, missing optional columns decode as
//! absent, and nothing here panics.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::model::{Edge, EdgeType, Facet, Node, SyncState};

/// Format a timestamp for storage.
pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Format an optional timestamp for storage.
pub fn opt_ts_to_sql(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(ts_to_sql)
}

/// Encode a tags list as its JSON storage form.
pub fn tags_to_sql(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a required RFC 3339 timestamp column.
fn parse_ts(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid {} timestamp '{}': {}", field_name, value, e),
                )),
            )
        })
}

fn get_ts(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    parse_ts(&raw, col)
}

fn get_ts_opt(row: &Row, col: &str) -> Option<DateTime<Utc>> {
    let raw: Option<String> = row.get(col).ok().flatten();
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Decode a `nodes` row.
pub fn node_from_row(row: &Row) -> rusqlite::Result<Node> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(Node {
        id: row.get("id")?,
        node_type: row.get("node_type")?,
        name: row.get("name")?,
        content: row.get("content").ok().flatten(),
        summary: row.get("summary").ok().flatten(),
        latitude: row.get("latitude").ok().flatten(),
        longitude: row.get("longitude").ok().flatten(),
        location_name: row.get("location_name").ok().flatten(),
        location_address: row.get("location_address").ok().flatten(),
        created_at: get_ts(row, "created_at")?,
        modified_at: get_ts(row, "modified_at")?,
        due_at: get_ts_opt(row, "due_at"),
        completed_at: get_ts_opt(row, "completed_at"),
        event_start: get_ts_opt(row, "event_start"),
        event_end: get_ts_opt(row, "event_end"),
        folder: row.get("folder").ok().flatten(),
        tags,
        status: row.get("status").ok().flatten(),
        priority: row.get("priority").ok().flatten(),
        importance: row.get("importance").ok().flatten(),
        sort_order: row.get("sort_order").ok().flatten(),
        source: row.get("source").ok().flatten(),
        source_id: row.get("source_id").ok().flatten(),
        source_url: row.get("source_url").ok().flatten(),
        deleted_at: get_ts_opt(row, "deleted_at"),
        version: row.get("version")?,
        sync_version: row.get("sync_version")?,
        last_synced_at: get_ts_opt(row, "last_synced_at"),
        conflict_resolved_at: get_ts_opt(row, "conflict_resolved_at"),
    })
}

/// Decode an `edges` row.
pub fn edge_from_row(row: &Row) -> rusqlite::Result<Edge> {
    let kind: String = row.get("edge_type")?;

    Ok(Edge {
        id: row.get("id")?,
        edge_type: EdgeType::parse(&kind),
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        label: row.get("label").ok().flatten(),
        weight: row.get("weight")?,
        directed: row.get("directed")?,
        sequence_order: row.get("sequence_order").ok().flatten(),
        channel: row.get("channel").ok().flatten(),
        timestamp: get_ts_opt(row, "timestamp"),
        subject: row.get("subject").ok().flatten(),
        sync_version: row.get("sync_version")?,
        last_synced_version: row.get("last_synced_version").ok().flatten().unwrap_or(0),
    })
}

/// Decode a `facets` row.
pub fn facet_from_row(row: &Row) -> rusqlite::Result<Facet> {
    Ok(Facet {
        id: row.get("id")?,
        name: row.get("name")?,
        facet_type: row.get("facet_type").ok().flatten(),
        query: row.get("query").ok().flatten(),
        sort_order: row.get("sort_order")?,
        created_at: get_ts(row, "created_at")?,
        modified_at: get_ts(row, "modified_at")?,
    })
}

/// Decode the `sync_state` singleton row.
pub fn sync_state_from_row(row: &Row) -> rusqlite::Result<SyncState> {
    Ok(SyncState {
        id: row.get("id")?,
        last_sync_token: row.get("last_sync_token").ok().flatten(),
        last_sync_at: get_ts_opt(row, "last_sync_at"),
        pending_changes: row.get("pending_changes")?,
        conflict_count: row.get("conflict_count")?,
        consecutive_failures: row.get("consecutive_failures")?,
        last_error: row.get("last_error").ok().flatten(),
        last_error_at: get_ts_opt(row, "last_error_at"),
    })
}
