//! PageRank
//!
//! Power iteration over one read snapshot. Mass from dangling nodes (no
//! outbound edges) is redistributed uniformly each round so ranks keep
//! summing to one. Deterministic for a fixed input.

use std::collections::HashMap;

use crate::error::Result;
use crate::model::Node;
use crate::storage::GraphStore;

use super::{load_snapshot, GraphSnapshot};

/// Standard damping factor
pub const DEFAULT_DAMPING: f64 = 0.85;

/// Default number of power iterations
pub const DEFAULT_ITERATIONS: u32 = 20;

pub(crate) fn page_rank(
    snapshot: &GraphSnapshot,
    damping: f64,
    iterations: u32,
) -> Vec<(Node, f64)> {
    let n = snapshot.nodes.len();
    if n == 0 {
        return Vec::new();
    }

    let index: HashMap<&str, usize> = snapshot
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();

    // Outbound adjacency; undirected edges point both ways.
    let mut outbound = vec![Vec::new(); n];
    for edge in &snapshot.edges {
        let (Some(&s), Some(&t)) = (
            index.get(edge.source_id.as_str()),
            index.get(edge.target_id.as_str()),
        ) else {
            continue;
        };
        outbound[s].push(t);
        if !edge.directed {
            outbound[t].push(s);
        }
    }

    let uniform = 1.0 / n as f64;
    let mut rank = vec![uniform; n];

    for _ in 0..iterations {
        let mut next = vec![(1.0 - damping) * uniform; n];

        let mut dangling_mass = 0.0;
        for (s, targets) in outbound.iter().enumerate() {
            if targets.is_empty() {
                dangling_mass += rank[s];
                continue;
            }
            let share = damping * rank[s] / targets.len() as f64;
            for &t in targets {
                next[t] += share;
            }
        }

        // Dangling correction: spread stranded mass over every node.
        let correction = damping * dangling_mass * uniform;
        for value in &mut next {
            *value += correction;
        }

        rank = next;
    }

    let mut ranked: Vec<(Node, f64)> = snapshot
        .nodes
        .iter()
        .cloned()
        .zip(rank)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    ranked
}

impl GraphStore {
    /// PageRank over the active subgraph with the standard damping (0.85)
    /// and 20 iterations, highest rank first.
    pub async fn page_rank(&self) -> Result<Vec<(Node, f64)>> {
        self.page_rank_with(DEFAULT_DAMPING, DEFAULT_ITERATIONS).await
    }

    /// PageRank with explicit damping and iteration count.
    pub async fn page_rank_with(
        &self,
        damping: f64,
        iterations: u32,
    ) -> Result<Vec<(Node, f64)>> {
        self.read(move |conn| {
            let snapshot = load_snapshot(conn)?;
            Ok(page_rank(&snapshot, damping, iterations))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, EdgeType};

    async fn hub_and_spokes() -> GraphStore {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["hub", "s1", "s2", "s3"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }
        for spoke in ["s1", "s2", "s3"] {
            store
                .create_edge(Edge::new(EdgeType::Link, spoke, "hub"))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn hub_ranks_strictly_highest_and_spokes_tie() {
        let store = hub_and_spokes().await;
        let ranked = store.page_rank().await.unwrap();

        assert_eq!(ranked[0].0.id, "hub");
        assert!(ranked[0].1 > ranked[1].1);

        let spoke_ranks: Vec<f64> = ranked[1..].iter().map(|(_, r)| *r).collect();
        for rank in &spoke_ranks {
            assert!((rank - spoke_ranks[0]).abs() < 1e-12, "spokes should tie");
        }
    }

    #[tokio::test]
    async fn ranks_sum_to_one() {
        let store = hub_and_spokes().await;
        let ranked = store.page_rank().await.unwrap();
        let total: f64 = ranked.iter().map(|(_, r)| r).sum();
        assert!((total - 1.0).abs() < 1e-9, "rank mass drifted: {total}");
    }

    #[tokio::test]
    async fn deterministic_for_fixed_input() {
        let store = hub_and_spokes().await;
        let first = store.page_rank().await.unwrap();
        let second = store.page_rank().await.unwrap();

        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.0.id, b.0.id);
            assert_eq!(a.1, b.1);
        }
    }

    #[tokio::test]
    async fn dangling_mass_is_redistributed() {
        // hub has no outbound edges; without redistribution its mass would
        // leak every iteration and the sum would decay below one.
        let store = hub_and_spokes().await;
        let ranked = store.page_rank_with(0.85, 50).await.unwrap();
        let total: f64 = ranked.iter().map(|(_, r)| r).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_graph_yields_no_ranks() {
        let store = GraphStore::open_in_memory().unwrap();
        assert!(store.page_rank().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn isolated_pair_splits_evenly() {
        let store = GraphStore::open_in_memory().unwrap();
        for id in ["a", "b"] {
            store
                .create_node(Node::with_id(id, id.to_uppercase()))
                .await
                .unwrap();
        }

        let ranked = store.page_rank().await.unwrap();
        assert!((ranked[0].1 - 0.5).abs() < 1e-9);
        assert!((ranked[1].1 - 0.5).abs() < 1e-9);
    }
}
