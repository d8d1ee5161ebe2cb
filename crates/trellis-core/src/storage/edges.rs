//! Edge CRUD
//!
//! Edges are hard-deleted and `(source_id, target_id, edge_type)` is unique.
//! Endpoints are immutable after creation; re-linking means delete + create.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::model::{Edge, EdgeType};
use crate::storage::codec;
use crate::storage::store::GraphStore;
use crate::txn::ChangeOp;

pub(crate) fn insert_edge(conn: &Connection, edge: &Edge) -> Result<()> {
    conn.execute(
        "INSERT INTO edges (
            id, edge_type, source_id, target_id,
            label, weight, directed, sequence_order,
            channel, timestamp, subject,
            sync_version, last_synced_version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            edge.id,
            edge.edge_type.as_str(),
            edge.source_id,
            edge.target_id,
            edge.label,
            edge.weight,
            edge.directed,
            edge.sequence_order,
            edge.channel,
            codec::opt_ts_to_sql(&edge.timestamp),
            edge.subject,
            edge.sync_version,
            edge.last_synced_version,
        ],
    )
    .map_err(|e| StoreError::insert("edge", &edge.id, e))?;
    Ok(())
}

pub(crate) fn update_edge(conn: &Connection, edge: &Edge) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE edges SET
                edge_type = ?2, label = ?3, weight = ?4, directed = ?5,
                sequence_order = ?6, channel = ?7, timestamp = ?8, subject = ?9,
                sync_version = sync_version + 1
            WHERE id = ?1",
            params![
                edge.id,
                edge.edge_type.as_str(),
                edge.label,
                edge.weight,
                edge.directed,
                edge.sequence_order,
                edge.channel,
                codec::opt_ts_to_sql(&edge.timestamp),
                edge.subject,
            ],
        )
        .map_err(|e| StoreError::insert("edge", &edge.id, e))?;

    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "edge",
            id: edge.id.clone(),
        });
    }
    Ok(())
}

/// Whether adding `source -NEST-> target` would close a containment cycle:
/// the source is already nested (transitively) under the target.
fn nest_would_cycle(conn: &Connection, source_id: &str, target_id: &str) -> Result<bool> {
    if source_id == target_id {
        return Ok(true);
    }
    conn.query_row(
        "WITH RECURSIVE nested(id) AS (
            SELECT target_id FROM edges WHERE source_id = ?1 AND edge_type = 'NEST'
            UNION
            SELECT e.target_id FROM edges e JOIN nested n ON e.source_id = n.id
            WHERE e.edge_type = 'NEST'
        )
        SELECT EXISTS (SELECT 1 FROM nested WHERE id = ?2)",
        params![target_id, source_id],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

pub(crate) fn delete_edge(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM edges WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "edge",
            id: id.to_string(),
        });
    }
    Ok(())
}

fn collect_edges(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map(params, codec::edge_from_row)
        .map_err(|e| StoreError::query(sql, e))?;

    let mut edges = Vec::new();
    for edge in rows {
        edges.push(edge?);
    }
    Ok(edges)
}

pub(crate) fn edges_from(
    conn: &Connection,
    source_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>> {
    match edge_type {
        Some(kind) => collect_edges(
            conn,
            "SELECT * FROM edges WHERE source_id = ?1 AND edge_type = ?2
             ORDER BY COALESCE(sequence_order, 0), id",
            params![source_id, kind.as_str()],
        ),
        None => collect_edges(
            conn,
            "SELECT * FROM edges WHERE source_id = ?1
             ORDER BY COALESCE(sequence_order, 0), id",
            params![source_id],
        ),
    }
}

pub(crate) fn edges_to(
    conn: &Connection,
    target_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>> {
    match edge_type {
        Some(kind) => collect_edges(
            conn,
            "SELECT * FROM edges WHERE target_id = ?1 AND edge_type = ?2
             ORDER BY COALESCE(sequence_order, 0), id",
            params![target_id, kind.as_str()],
        ),
        None => collect_edges(
            conn,
            "SELECT * FROM edges WHERE target_id = ?1
             ORDER BY COALESCE(sequence_order, 0), id",
            params![target_id],
        ),
    }
}

impl GraphStore {
    /// Insert a new edge. Both endpoints must exist; the
    /// `(source, target, type)` triple must be free. A `NEST` edge that
    /// would close a containment cycle is rejected with
    /// [`StoreError::CircularReference`].
    pub async fn create_edge(&self, edge: Edge) -> Result<Edge> {
        let correlation_id = format!("edge.create/{}", edge.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                if edge.edge_type == EdgeType::Nest
                    && nest_would_cycle(scope.conn(), &edge.source_id, &edge.target_id)?
                {
                    return Err(StoreError::CircularReference(edge.source_id.clone()));
                }
                insert_edge(scope.conn(), &edge)?;
                scope.record("edges", ChangeOp::Insert, Some(edge.id.clone()));
                Ok(())
            })
            .await?;
        Ok(edge)
    }

    /// Update edge attributes, bumping `sync_version`. Endpoints are
    /// immutable.
    pub async fn update_edge(&self, edge: &Edge) -> Result<()> {
        let correlation_id = format!("edge.update/{}", edge.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                update_edge(scope.conn(), edge)?;
                scope.record("edges", ChangeOp::Update, Some(edge.id.clone()));
                Ok(())
            })
            .await
    }

    /// Hard-delete an edge.
    pub async fn delete_edge(&self, id: &str) -> Result<()> {
        let correlation_id = format!("edge.delete/{id}");
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                delete_edge(scope.conn(), id)?;
                scope.record("edges", ChangeOp::Delete, Some(id.to_string()));
                Ok(())
            })
            .await
    }

    /// Outbound edges of a node, optionally filtered by kind. Sequence
    /// edges come back in `sequence_order`.
    pub async fn edges_from(
        &self,
        source_id: &str,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        self.read(move |conn| edges_from(conn, source_id, edge_type))
            .await
    }

    /// Inbound edges of a node, optionally filtered by kind.
    pub async fn edges_to(
        &self,
        target_id: &str,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>> {
        self.read(move |conn| edges_to(conn, target_id, edge_type))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    async fn store_with_nodes(ids: &[&str]) -> GraphStore {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ids {
            store
                .create_node(Node::with_id(*id, id.to_uppercase()))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn create_and_list_edges() {
        let store = store_with_nodes(&["a", "b", "c"]).await;
        store
            .create_edge(Edge::new(EdgeType::Link, "a", "b"))
            .await
            .unwrap();
        store
            .create_edge(Edge::new(EdgeType::Nest, "a", "c"))
            .await
            .unwrap();

        let all = store.edges_from("a", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let nests = store.edges_from("a", Some(EdgeType::Nest)).await.unwrap();
        assert_eq!(nests.len(), 1);
        assert_eq!(nests[0].target_id, "c");

        let inbound = store.edges_to("b", None).await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].source_id, "a");
    }

    #[tokio::test]
    async fn edge_requires_existing_endpoints() {
        let store = store_with_nodes(&["a"]).await;
        let err = store
            .create_edge(Edge::new(EdgeType::Link, "a", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[tokio::test]
    async fn duplicate_triple_rejected() {
        let store = store_with_nodes(&["a", "b"]).await;
        store
            .create_edge(Edge::new(EdgeType::Link, "a", "b"))
            .await
            .unwrap();

        let err = store
            .create_edge(Edge::new(EdgeType::Link, "a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "edge", .. }));
    }

    #[tokio::test]
    async fn update_bumps_sync_version() {
        let store = store_with_nodes(&["a", "b"]).await;
        let mut edge = store
            .create_edge(Edge::new(EdgeType::Link, "a", "b"))
            .await
            .unwrap();

        edge.label = Some("see also".into());
        store.update_edge(&edge).await.unwrap();

        let stored = &store.edges_from("a", None).await.unwrap()[0];
        assert_eq!(stored.label.as_deref(), Some("see also"));
        assert_eq!(stored.sync_version, edge.sync_version + 1);
    }

    #[tokio::test]
    async fn deleting_node_cascades_to_edges() {
        let store = store_with_nodes(&["a", "b"]).await;
        store
            .create_edge(Edge::new(EdgeType::Link, "a", "b"))
            .await
            .unwrap();

        store.purge_node("b").await.unwrap();
        assert!(store.edges_from("a", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nest_cycles_rejected() {
        let store = store_with_nodes(&["a", "b", "c"]).await;
        store
            .create_edge(Edge::new(EdgeType::Nest, "a", "b"))
            .await
            .unwrap();
        store
            .create_edge(Edge::new(EdgeType::Nest, "b", "c"))
            .await
            .unwrap();

        // c already sits under a; nesting a below c closes a loop.
        let err = store
            .create_edge(Edge::new(EdgeType::Nest, "c", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CircularReference(_)));

        let err = store
            .create_edge(Edge::new(EdgeType::Nest, "a", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CircularReference(_)));

        // Non-NEST edges may still form cycles freely.
        store
            .create_edge(Edge::new(EdgeType::Link, "c", "a"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sequence_edges_ordered() {
        let store = store_with_nodes(&["list", "x", "y", "z"]).await;
        for (target, order) in [("x", 3), ("y", 1), ("z", 2)] {
            let mut edge = Edge::new(EdgeType::Sequence, "list", target);
            edge.sequence_order = Some(order);
            store.create_edge(edge).await.unwrap();
        }

        let seq = store
            .edges_from("list", Some(EdgeType::Sequence))
            .await
            .unwrap();
        let targets: Vec<_> = seq.iter().map(|e| e.target_id.as_str()).collect();
        assert_eq!(targets, vec!["y", "z", "x"]);
    }
}
