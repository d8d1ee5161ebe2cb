//! Node CRUD
//!
//! Query functions over a raw connection plus the public [`GraphStore`]
//! methods that wrap them in leases and write scopes. Reads default to
//! active rows (`deleted_at IS NULL`); writes bump `version`,
//! `sync_version`, and `modified_at` server-side so counters never regress.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::Node;
use crate::storage::codec;
use crate::storage::store::GraphStore;
use crate::txn::ChangeOp;

pub(crate) fn insert_node(conn: &Connection, node: &Node) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (
            id, node_type, name, content, summary,
            latitude, longitude, location_name, location_address,
            created_at, modified_at, due_at, completed_at, event_start, event_end,
            folder, tags, status,
            priority, importance, sort_order,
            source, source_id, source_url,
            deleted_at, version,
            sync_version, last_synced_at, conflict_resolved_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18,
            ?19, ?20, ?21,
            ?22, ?23, ?24,
            ?25, ?26,
            ?27, ?28, ?29
        )",
        params![
            node.id,
            node.node_type,
            node.name,
            node.content,
            node.summary,
            node.latitude,
            node.longitude,
            node.location_name,
            node.location_address,
            codec::ts_to_sql(&node.created_at),
            codec::ts_to_sql(&node.modified_at),
            codec::opt_ts_to_sql(&node.due_at),
            codec::opt_ts_to_sql(&node.completed_at),
            codec::opt_ts_to_sql(&node.event_start),
            codec::opt_ts_to_sql(&node.event_end),
            node.folder,
            codec::tags_to_sql(&node.tags),
            node.status,
            node.priority,
            node.importance,
            node.sort_order,
            node.source,
            node.source_id,
            node.source_url,
            codec::opt_ts_to_sql(&node.deleted_at),
            node.version,
            node.sync_version,
            codec::opt_ts_to_sql(&node.last_synced_at),
            codec::opt_ts_to_sql(&node.conflict_resolved_at),
        ],
    )
    .map_err(|e| StoreError::insert("node", &node.id, e))?;
    Ok(())
}

/// Persist the caller-editable fields of a full row. `created_at` and the
/// sync bookkeeping columns are not caller-writable; `version` and
/// `sync_version` increment server-side.
pub(crate) fn update_node(conn: &Connection, node: &Node) -> Result<()> {
    let now = Utc::now();
    let changed = conn
        .execute(
            "UPDATE nodes SET
                node_type = ?2, name = ?3, content = ?4, summary = ?5,
                latitude = ?6, longitude = ?7, location_name = ?8, location_address = ?9,
                modified_at = ?10, due_at = ?11, completed_at = ?12,
                event_start = ?13, event_end = ?14,
                folder = ?15, tags = ?16, status = ?17,
                priority = ?18, importance = ?19, sort_order = ?20,
                source = ?21, source_id = ?22, source_url = ?23,
                version = version + 1,
                sync_version = sync_version + 1
            WHERE id = ?1",
            params![
                node.id,
                node.node_type,
                node.name,
                node.content,
                node.summary,
                node.latitude,
                node.longitude,
                node.location_name,
                node.location_address,
                codec::ts_to_sql(&now),
                codec::opt_ts_to_sql(&node.due_at),
                codec::opt_ts_to_sql(&node.completed_at),
                codec::opt_ts_to_sql(&node.event_start),
                codec::opt_ts_to_sql(&node.event_end),
                node.folder,
                codec::tags_to_sql(&node.tags),
                node.status,
                node.priority,
                node.importance,
                node.sort_order,
                node.source,
                node.source_id,
                node.source_url,
            ],
        )
        .map_err(|e| StoreError::insert("node", &node.id, e))?;

    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "node",
            id: node.id.clone(),
        });
    }
    Ok(())
}

pub(crate) fn soft_delete_node(conn: &Connection, id: &str) -> Result<()> {
    let now = codec::ts_to_sql(&Utc::now());
    let changed = conn.execute(
        "UPDATE nodes SET
            deleted_at = ?2,
            modified_at = ?2,
            version = version + 1,
            sync_version = sync_version + 1
        WHERE id = ?1 AND deleted_at IS NULL",
        params![id, now],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "node",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn restore_node(conn: &Connection, id: &str) -> Result<()> {
    let now = codec::ts_to_sql(&Utc::now());
    let changed = conn.execute(
        "UPDATE nodes SET
            deleted_at = NULL,
            modified_at = ?2,
            version = version + 1,
            sync_version = sync_version + 1
        WHERE id = ?1 AND deleted_at IS NOT NULL",
        params![id, now],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "node",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn purge_node(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "node",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn get_node(conn: &Connection, id: &str) -> Result<Option<Node>> {
    conn.query_row(
        "SELECT * FROM nodes WHERE id = ?1 AND deleted_at IS NULL",
        params![id],
        codec::node_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(crate) fn get_node_any(conn: &Connection, id: &str) -> Result<Option<Node>> {
    conn.query_row(
        "SELECT * FROM nodes WHERE id = ?1",
        params![id],
        codec::node_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

fn collect_nodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Node>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map(params, codec::node_from_row)
        .map_err(|e| StoreError::query(sql, e))?;

    let mut nodes = Vec::new();
    for node in rows {
        nodes.push(node?);
    }
    Ok(nodes)
}

pub(crate) fn get_nodes(conn: &Connection, active_only: bool) -> Result<Vec<Node>> {
    if active_only {
        collect_nodes(
            conn,
            "SELECT * FROM nodes WHERE deleted_at IS NULL ORDER BY modified_at DESC",
            [],
        )
    } else {
        collect_nodes(conn, "SELECT * FROM nodes ORDER BY modified_at DESC", [])
    }
}

pub(crate) fn get_nodes_in_folder(conn: &Connection, folder: &str) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        "SELECT * FROM nodes
         WHERE folder = ?1 AND deleted_at IS NULL
         ORDER BY sort_order, name",
        params![folder],
    )
}

pub(crate) fn get_nodes_of_type(conn: &Connection, node_type: &str) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        "SELECT * FROM nodes
         WHERE node_type = ?1 AND deleted_at IS NULL
         ORDER BY modified_at DESC",
        params![node_type],
    )
}

pub(crate) fn get_node_by_source(
    conn: &Connection,
    source: &str,
    source_id: &str,
) -> Result<Option<Node>> {
    conn.query_row(
        "SELECT * FROM nodes
         WHERE source = ?1 AND source_id = ?2 AND deleted_at IS NULL",
        params![source, source_id],
        codec::node_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(crate) fn count_active_nodes(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM nodes WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

impl GraphStore {
    /// Insert a new node. Fails with [`StoreError::Duplicate`] when the id
    /// (or an occupied `(source, source_id)` pair) already exists.
    pub async fn create_node(&self, node: Node) -> Result<Node> {
        let correlation_id = format!("node.create/{}", node.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                insert_node(scope.conn(), &node)?;
                scope.record("nodes", ChangeOp::Insert, Some(node.id.clone()));
                Ok(())
            })
            .await?;

        self.get_node_including_deleted(&node.id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "node",
                id: node.id,
            })
    }

    /// Persist a full row, bumping `version`, `sync_version`, and
    /// `modified_at`. Returns the refreshed row.
    pub async fn update_node(&self, node: &Node) -> Result<Node> {
        let correlation_id = format!("node.update/{}", node.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                update_node(scope.conn(), node)?;
                scope.record("nodes", ChangeOp::Update, Some(node.id.clone()));
                Ok(())
            })
            .await?;

        self.get_node_including_deleted(&node.id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "node",
                id: node.id.clone(),
            })
    }

    /// Mark a node deleted. It disappears from reads but stays on disk
    /// until purged.
    pub async fn soft_delete_node(&self, id: &str) -> Result<()> {
        let correlation_id = format!("node.soft_delete/{id}");
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                soft_delete_node(scope.conn(), id)?;
                scope.record("nodes", ChangeOp::Update, Some(id.to_string()));
                Ok(())
            })
            .await
    }

    /// Undo a soft delete, bumping versions. Returns the restored row.
    pub async fn restore_node(&self, id: &str) -> Result<Node> {
        let correlation_id = format!("node.restore/{id}");
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                restore_node(scope.conn(), id)?;
                scope.record("nodes", ChangeOp::Update, Some(id.to_string()));
                Ok(())
            })
            .await?;

        self.get_node(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: "node",
            id: id.to_string(),
        })
    }

    /// Hard-delete a node row. Edges cascade.
    pub async fn purge_node(&self, id: &str) -> Result<()> {
        let correlation_id = format!("node.purge/{id}");
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                purge_node(scope.conn(), id)?;
                scope.record("nodes", ChangeOp::Delete, Some(id.to_string()));
                Ok(())
            })
            .await
    }

    /// Fetch an active node by id.
    pub async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        self.read(|conn| get_node(conn, id)).await
    }

    /// Fetch a node by id regardless of soft-delete state.
    pub async fn get_node_including_deleted(&self, id: &str) -> Result<Option<Node>> {
        self.read(|conn| get_node_any(conn, id)).await
    }

    /// All nodes, newest modification first. `active_only = false` includes
    /// soft-deleted rows.
    pub async fn get_nodes(&self, active_only: bool) -> Result<Vec<Node>> {
        self.read(move |conn| get_nodes(conn, active_only)).await
    }

    /// Active nodes in a folder, by `(sort_order, name)`.
    pub async fn get_nodes_in_folder(&self, folder: &str) -> Result<Vec<Node>> {
        self.read(|conn| get_nodes_in_folder(conn, folder)).await
    }

    /// Active nodes of one type, newest modification first.
    pub async fn get_nodes_of_type(&self, node_type: &str) -> Result<Vec<Node>> {
        self.read(|conn| get_nodes_of_type(conn, node_type)).await
    }

    /// Look up an active node by its provenance pair.
    pub async fn get_node_by_source(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Node>> {
        self.read(|conn| get_node_by_source(conn, source, source_id))
            .await
    }

    /// Number of active nodes.
    pub async fn count_active_nodes(&self) -> Result<i64> {
        self.read(count_active_nodes).await
    }
}
