//! Weighted shortest paths
//!
//! Classical Dijkstra over one read snapshot: binary-heap frontier,
//! back-pointer reconstruction, early exit once the target settles.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{Result, StoreError};
use crate::model::{Edge, Node};
use crate::storage::GraphStore;

use super::{load_snapshot, GraphSnapshot};

/// A weighted path through the graph
#[derive(Debug, Clone)]
pub struct WeightedPath {
    /// Nodes from source to target, inclusive
    pub nodes: Vec<Node>,
    /// Sum of edge weights along the path
    pub total_weight: f64,
}

/// Min-heap entry ordered by distance
#[derive(Copy, Clone, PartialEq)]
struct Frontier {
    dist: f64,
    node: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest distance.
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outbound adjacency with weights; undirected edges contribute both
/// directions.
fn build_adjacency(
    nodes: &[Node],
    edges: &[Edge],
) -> (HashMap<String, usize>, Vec<Vec<(usize, f64)>>) {
    let index: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    let mut adjacency = vec![Vec::new(); nodes.len()];
    for edge in edges {
        let (Some(&s), Some(&t)) = (index.get(&edge.source_id), index.get(&edge.target_id))
        else {
            continue;
        };
        adjacency[s].push((t, edge.weight));
        if !edge.directed {
            adjacency[t].push((s, edge.weight));
        }
    }

    (index, adjacency)
}

/// Run Dijkstra from `from`, optionally stopping once `until` settles.
/// Returns distances and back-pointers indexed like `nodes`.
fn run(
    nodes: &[Node],
    adjacency: &[Vec<(usize, f64)>],
    from: usize,
    until: Option<usize>,
) -> (Vec<f64>, Vec<Option<usize>>) {
    let mut dist = vec![f64::INFINITY; nodes.len()];
    let mut prev: Vec<Option<usize>> = vec![None; nodes.len()];
    let mut settled = vec![false; nodes.len()];

    dist[from] = 0.0;
    let mut heap = BinaryHeap::new();
    heap.push(Frontier {
        dist: 0.0,
        node: from,
    });

    while let Some(Frontier { dist: d, node: u }) = heap.pop() {
        if settled[u] {
            continue;
        }
        settled[u] = true;
        if until == Some(u) {
            break;
        }

        for &(v, weight) in &adjacency[u] {
            let candidate = d + weight;
            if candidate < dist[v] {
                dist[v] = candidate;
                prev[v] = Some(u);
                heap.push(Frontier {
                    dist: candidate,
                    node: v,
                });
            }
        }
    }

    (dist, prev)
}

pub(crate) fn dijkstra_path(
    snapshot: &GraphSnapshot,
    from: &str,
    to: &str,
) -> Result<WeightedPath> {
    let (index, adjacency) = build_adjacency(&snapshot.nodes, &snapshot.edges);

    let source = *index.get(from).ok_or_else(|| StoreError::NotFound {
        entity: "node",
        id: from.to_string(),
    })?;
    let target = *index.get(to).ok_or_else(|| StoreError::NotFound {
        entity: "node",
        id: to.to_string(),
    })?;

    let (dist, prev) = run(&snapshot.nodes, &adjacency, source, Some(target));

    if dist[target].is_infinite() {
        return Err(StoreError::InvalidPath {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    // Walk back-pointers from the target.
    let mut order = vec![target];
    let mut cursor = target;
    while let Some(parent) = prev[cursor] {
        order.push(parent);
        cursor = parent;
    }
    order.reverse();

    Ok(WeightedPath {
        nodes: order
            .into_iter()
            .map(|i| snapshot.nodes[i].clone())
            .collect(),
        total_weight: dist[target],
    })
}

pub(crate) fn dijkstra_all(snapshot: &GraphSnapshot, from: &str) -> Result<Vec<(Node, f64)>> {
    let (index, adjacency) = build_adjacency(&snapshot.nodes, &snapshot.edges);

    let source = *index.get(from).ok_or_else(|| StoreError::NotFound {
        entity: "node",
        id: from.to_string(),
    })?;

    let (dist, _) = run(&snapshot.nodes, &adjacency, source, None);

    let mut reachable: Vec<(Node, f64)> = snapshot
        .nodes
        .iter()
        .zip(dist)
        .filter(|(_, d)| d.is_finite())
        .map(|(n, d)| (n.clone(), d))
        .collect();
    reachable.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
    Ok(reachable)
}

impl GraphStore {
    /// Minimum-weight path between two active nodes.
    ///
    /// Fails with [`StoreError::NotFound`] when either endpoint is missing
    /// and [`StoreError::InvalidPath`] when no route exists.
    pub async fn dijkstra_path(&self, from: &str, to: &str) -> Result<WeightedPath> {
        self.read(move |conn| {
            let snapshot = load_snapshot(conn)?;
            dijkstra_path(&snapshot, from, to)
        })
        .await
    }

    /// Weighted distances from `from` to every reachable active node,
    /// nearest first.
    pub async fn dijkstra_all(&self, from: &str) -> Result<Vec<(Node, f64)>> {
        self.read(move |conn| {
            let snapshot = load_snapshot(conn)?;
            dijkstra_all(&snapshot, from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EdgeType;

    /// A -> B (10), A -> C (1), C -> B (1), B -> D (1), C -> D (10)
    async fn weighted_store() -> GraphStore {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b", "c", "d"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        for (s, t, w) in [
            ("a", "b", 10.0),
            ("a", "c", 1.0),
            ("c", "b", 1.0),
            ("b", "d", 1.0),
            ("c", "d", 10.0),
        ] {
            store
                .create_edge(Edge::new(EdgeType::Link, s, t).with_weight(w))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn cheapest_route_wins_over_fewest_hops() {
        let store = weighted_store().await;
        let path = store.dijkstra_path("a", "d").await.unwrap();

        let ids: Vec<_> = path.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
        assert_eq!(path.total_weight, 3.0);
    }

    #[tokio::test]
    async fn unreachable_target_is_invalid_path() {
        let store = weighted_store().await;
        let err = store.dijkstra_path("d", "a").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn missing_endpoint_is_not_found() {
        let store = weighted_store().await;
        let err = store.dijkstra_path("a", "ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn undirected_edges_walk_both_ways() {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        store
            .create_edge(Edge::new(EdgeType::Link, "a", "b").undirected().with_weight(2.5))
            .await
            .unwrap();

        let path = store.dijkstra_path("b", "a").await.unwrap();
        assert_eq!(path.total_weight, 2.5);
    }

    #[tokio::test]
    async fn all_distances_sorted_nearest_first() {
        let store = weighted_store().await;
        let all = store.dijkstra_all("a").await.unwrap();

        let pairs: Vec<_> = all.iter().map(|(n, d)| (n.id.as_str(), *d)).collect();
        assert_eq!(
            pairs,
            vec![("a", 0.0), ("c", 1.0), ("b", 2.0), ("d", 3.0)]
        );
    }

    #[tokio::test]
    async fn soft_deleted_nodes_drop_out_of_routes() {
        let store = weighted_store().await;
        // Removing C forces the expensive direct A -> B edge.
        store.soft_delete_node("c").await.unwrap();

        let path = store.dijkstra_path("a", "d").await.unwrap();
        let ids: Vec<_> = path.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert_eq!(path.total_weight, 11.0);
    }
}
