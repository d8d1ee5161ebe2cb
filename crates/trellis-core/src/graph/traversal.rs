//! Recursive-CTE traversal
//!
//! Cycle exclusion accumulates a comma-wrapped path string per row and
//! rejects candidates already on the path. Directed edges expand forward
//! only; undirected edges expand from either endpoint.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::Node;
use crate::storage::codec;
use crate::storage::GraphStore;

/// Default bound for unweighted shortest-path searches
pub const DEFAULT_MAX_PATH_DEPTH: i64 = 10;

/// A node reached during BFS, with its minimum depth from the start
#[derive(Debug, Clone)]
pub struct Reachable {
    pub node: Node,
    pub depth: i64,
}

pub(crate) fn connected(
    conn: &Connection,
    start: &str,
    max_depth: i64,
) -> Result<Vec<Reachable>> {
    let sql = "
        WITH RECURSIVE reachable(id, depth, path) AS (
            SELECT n.id, 0, ',' || n.id || ','
            FROM nodes n
            WHERE n.id = ?1 AND n.deleted_at IS NULL
            UNION ALL
            SELECT n.id, r.depth + 1, r.path || n.id || ','
            FROM reachable r
            JOIN edges e ON e.source_id = r.id OR (e.directed = 0 AND e.target_id = r.id)
            JOIN nodes n ON n.id = CASE WHEN e.source_id = r.id THEN e.target_id ELSE e.source_id END
            WHERE r.depth < ?2
              AND n.deleted_at IS NULL
              AND instr(r.path, ',' || n.id || ',') = 0
        )
        SELECT n.*, MIN(r.depth) AS depth
        FROM reachable r
        JOIN nodes n ON n.id = r.id
        GROUP BY n.id
        ORDER BY depth, n.name";

    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map(params![start, max_depth], |row| {
            Ok(Reachable {
                node: codec::node_from_row(row)?,
                depth: row.get("depth")?,
            })
        })
        .map_err(|e| StoreError::query(sql, e))?;

    let mut reachable = Vec::new();
    for hit in rows {
        reachable.push(hit?);
    }
    Ok(reachable)
}

pub(crate) fn shortest_path(
    conn: &Connection,
    from: &str,
    to: &str,
    max_depth: i64,
) -> Result<Option<Vec<Node>>> {
    let sql = "
        WITH RECURSIVE walk(id, depth, path) AS (
            SELECT n.id, 0, ',' || n.id || ','
            FROM nodes n
            WHERE n.id = ?1 AND n.deleted_at IS NULL
            UNION ALL
            SELECT n.id, w.depth + 1, w.path || n.id || ','
            FROM walk w
            JOIN edges e ON e.source_id = w.id OR (e.directed = 0 AND e.target_id = w.id)
            JOIN nodes n ON n.id = CASE WHEN e.source_id = w.id THEN e.target_id ELSE e.source_id END
            WHERE w.depth < ?3
              AND n.deleted_at IS NULL
              AND instr(w.path, ',' || n.id || ',') = 0
        )
        SELECT path FROM walk WHERE id = ?2 ORDER BY depth LIMIT 1";

    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let path: Option<String> = stmt
        .query_row(params![from, to, max_depth], |row| row.get(0))
        .optional()
        .map_err(|e| StoreError::query(sql, e))?;

    let Some(path) = path else {
        return Ok(None);
    };

    // Decode the comma-joined ids back into nodes, in path order.
    let mut nodes = Vec::new();
    for id in path.split(',').filter(|s| !s.is_empty()) {
        let node = crate::storage::get_node_any(conn, id)?.ok_or_else(|| {
            StoreError::NotFound {
                entity: "node",
                id: id.to_string(),
            }
        })?;
        nodes.push(node);
    }
    Ok(Some(nodes))
}

pub(crate) fn neighbors(conn: &Connection, id: &str) -> Result<Vec<Node>> {
    // All-inbound rule: outbound targets plus sources of every inbound
    // edge, regardless of direction.
    let sql = "
        SELECT DISTINCT n.* FROM nodes n
        JOIN edges e ON (e.source_id = ?1 AND n.id = e.target_id)
                     OR (e.target_id = ?1 AND n.id = e.source_id)
        WHERE n.deleted_at IS NULL
        ORDER BY n.name";

    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map(params![id], codec::node_from_row)
        .map_err(|e| StoreError::query(sql, e))?;

    let mut nodes = Vec::new();
    for node in rows {
        nodes.push(node?);
    }
    Ok(nodes)
}

pub(crate) fn node_importance(conn: &Connection) -> Result<Vec<(Node, f64)>> {
    let sql = "
        SELECT n.*, COALESCE(SUM(e.weight), 0.0) AS score
        FROM nodes n
        LEFT JOIN edges e ON e.target_id = n.id
        WHERE n.deleted_at IS NULL
        GROUP BY n.id
        ORDER BY score DESC, n.name";

    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((codec::node_from_row(row)?, row.get::<_, f64>("score")?))
        })
        .map_err(|e| StoreError::query(sql, e))?;

    let mut scored = Vec::new();
    for hit in rows {
        scored.push(hit?);
    }
    Ok(scored)
}

impl GraphStore {
    /// All active nodes reachable from `start` within `max_depth` hops,
    /// each at its minimum depth, ordered by `(depth, name)`.
    pub async fn connected(&self, start: &str, max_depth: i64) -> Result<Vec<Reachable>> {
        self.read(move |conn| connected(conn, start, max_depth)).await
    }

    /// First shortest unweighted path from `from` to `to` within
    /// [`DEFAULT_MAX_PATH_DEPTH`] hops, or `None`.
    pub async fn shortest_path(&self, from: &str, to: &str) -> Result<Option<Vec<Node>>> {
        self.shortest_path_within(from, to, DEFAULT_MAX_PATH_DEPTH)
            .await
    }

    /// Shortest unweighted path with an explicit depth bound.
    pub async fn shortest_path_within(
        &self,
        from: &str,
        to: &str,
        max_depth: i64,
    ) -> Result<Option<Vec<Node>>> {
        self.read(move |conn| shortest_path(conn, from, to, max_depth))
            .await
    }

    /// Distinct active nodes directly adjacent to `id`, ordered by name.
    pub async fn neighbors(&self, id: &str) -> Result<Vec<Node>> {
        self.read(move |conn| neighbors(conn, id)).await
    }

    /// Inbound-weight centrality for every active node, descending.
    pub async fn node_importance(&self) -> Result<Vec<(Node, f64)>> {
        self.read(node_importance).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, EdgeType, Node};

    async fn diamond_store() -> GraphStore {
        // A -> B, A -> C, B -> D (directed)
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b", "c", "d"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        for (s, t) in [("a", "b"), ("a", "c"), ("b", "d")] {
            store
                .create_edge(Edge::new(EdgeType::Link, s, t))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn bfs_respects_depth_bound() {
        let store = diamond_store().await;

        let one_hop = store.connected("a", 1).await.unwrap();
        let ids: Vec<_> = one_hop.iter().map(|r| r.node.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(one_hop[0].depth, 0);
        assert_eq!(one_hop[1].depth, 1);

        let two_hops = store.connected("a", 2).await.unwrap();
        let ids: Vec<_> = two_hops.iter().map(|r| r.node.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn bfs_monotone_in_depth() {
        let store = diamond_store().await;
        let mut previous = 0;
        for depth in 0..4 {
            let size = store.connected("a", depth).await.unwrap().len();
            assert!(size >= previous);
            previous = size;
        }
    }

    #[tokio::test]
    async fn directed_edges_do_not_traverse_backwards() {
        let store = diamond_store().await;
        let from_d = store.connected("d", 3).await.unwrap();
        assert_eq!(from_d.len(), 1, "D has no outbound edges");
    }

    #[tokio::test]
    async fn undirected_edges_traverse_both_ways() {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        store
            .create_edge(Edge::new(EdgeType::Affinity, "a", "b").undirected())
            .await
            .unwrap();

        assert_eq!(store.connected("b", 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cycles_terminate() {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        for (s, t) in [("a", "b"), ("b", "c"), ("c", "a")] {
            store
                .create_edge(Edge::new(EdgeType::Link, s, t))
                .await
                .unwrap();
        }

        let reachable = store.connected("a", 10).await.unwrap();
        assert_eq!(reachable.len(), 3);
    }

    #[tokio::test]
    async fn shortest_path_through_undirected_square() {
        // A - B, B - D, A - C, C - D: two 2-hop routes from A to D.
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b", "c", "d"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        for (s, t) in [("a", "b"), ("b", "d"), ("a", "c"), ("c", "d")] {
            store
                .create_edge(Edge::new(EdgeType::Link, s, t).undirected())
                .await
                .unwrap();
        }

        let path = store.shortest_path("a", "d").await.unwrap().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().unwrap().id, "a");
        assert_eq!(path.last().unwrap().id, "d");
    }

    #[tokio::test]
    async fn shortest_path_absent_when_unreachable() {
        let store = diamond_store().await;
        assert!(store.shortest_path("d", "a").await.unwrap().is_none());

        // Depth bound of zero can only reach the start itself.
        assert!(store
            .shortest_path_within("a", "d", 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn shortest_path_to_self_is_single_node() {
        let store = diamond_store().await;
        let path = store.shortest_path("a", "a").await.unwrap().unwrap();
        assert_eq!(path.len(), 1);
    }

    #[tokio::test]
    async fn neighbors_use_all_inbound_rule() {
        let store = diamond_store().await;

        // B: outbound target D plus inbound source A (directed edge counts).
        let around_b = store.neighbors("b").await.unwrap();
        let ids: Vec<_> = around_b.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn neighbors_exclude_soft_deleted() {
        let store = diamond_store().await;
        store.soft_delete_node("b").await.unwrap();

        let around_a = store.neighbors("a").await.unwrap();
        let ids: Vec<_> = around_a.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn importance_sums_inbound_weights() {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["hub", "s1", "s2"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        store
            .create_edge(Edge::new(EdgeType::Link, "s1", "hub").with_weight(2.0))
            .await
            .unwrap();
        store
            .create_edge(Edge::new(EdgeType::Link, "s2", "hub").with_weight(3.0))
            .await
            .unwrap();

        let scored = store.node_importance().await.unwrap();
        assert_eq!(scored[0].0.id, "hub");
        assert_eq!(scored[0].1, 5.0);
        assert_eq!(scored[1].1, 0.0);
    }
}
