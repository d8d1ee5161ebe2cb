//! Graph Algorithms
//!
//! Traversal runs inside SQLite as recursive CTEs; the iterative algorithms
//! (Dijkstra, PageRank) load one read-snapshot of the active subgraph and
//! compute in memory, keeping the write path free. Soft-deleted nodes are
//! invisible everywhere, and edges expand in both directions when
//! undirected.

mod dijkstra;
mod pagerank;
mod traversal;

pub use dijkstra::WeightedPath;
pub use pagerank::{DEFAULT_DAMPING, DEFAULT_ITERATIONS};
pub use traversal::{Reachable, DEFAULT_MAX_PATH_DEPTH};

use rusqlite::Connection;

use crate::error::Result;
use crate::model::{Edge, Node};
use crate::storage::codec;

/// One consistent view of the active subgraph
pub(crate) struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Load all active nodes and the edges connecting them on one read lease.
pub(crate) fn load_snapshot(conn: &Connection) -> Result<GraphSnapshot> {
    let mut stmt =
        conn.prepare("SELECT * FROM nodes WHERE deleted_at IS NULL ORDER BY id")?;
    let rows = stmt.query_map([], codec::node_from_row)?;
    let mut nodes = Vec::new();
    for node in rows {
        nodes.push(node?);
    }

    let mut stmt = conn.prepare(
        "SELECT e.* FROM edges e
         JOIN nodes s ON s.id = e.source_id
         JOIN nodes t ON t.id = e.target_id
         WHERE s.deleted_at IS NULL AND t.deleted_at IS NULL
         ORDER BY e.id",
    )?;
    let rows = stmt.query_map([], codec::edge_from_row)?;
    let mut edges = Vec::new();
    for edge in rows {
        edges.push(edge?);
    }

    Ok(GraphSnapshot { nodes, edges })
}
