//! Full-Text Search
//!
//! BM25-ranked FTS5 search over the node text fields with column weights
//! `(name 1.0, content 0.75, tags 0.5, folder 0.25)`. User queries are
//! tokenized on whitespace; each token is double-quoted (embedded quotes
//! doubled) and suffixed with `*` for prefix matching, which neutralizes
//! FTS5 operator syntax in user input.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::model::Node;
use crate::storage::codec;
use crate::storage::store::GraphStore;

/// Default result cap for [`GraphStore::search`]
pub const DEFAULT_SEARCH_LIMIT: i64 = 50;

/// Build a safe FTS5 MATCH expression from raw user input.
///
/// `rust prog` becomes `"rust"* "prog"*`. An empty query yields an empty
/// expression; callers short-circuit it to no results.
pub(crate) fn build_match_expression(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn search_nodes(conn: &Connection, query: &str, limit: i64) -> Result<Vec<Node>> {
    let expression = build_match_expression(query);
    if expression.is_empty() {
        return Ok(Vec::new());
    }

    let sql = "SELECT n.*, bm25(nodes_fts, 1.0, 0.75, 0.5, 0.25) AS rank
               FROM nodes_fts
               JOIN nodes n ON n.rowid = nodes_fts.rowid
               WHERE nodes_fts MATCH ?1 AND n.deleted_at IS NULL
               ORDER BY rank
               LIMIT ?2";

    let mut stmt = conn.prepare(sql).map_err(|e| StoreError::query(sql, e))?;
    let rows = stmt
        .query_map(params![expression, limit], codec::node_from_row)
        .map_err(|e| StoreError::query(sql, e))?;

    let mut nodes = Vec::new();
    for node in rows {
        nodes.push(node?);
    }
    Ok(nodes)
}

impl GraphStore {
    /// Ranked full-text search over active nodes, capped at
    /// [`DEFAULT_SEARCH_LIMIT`] results.
    pub async fn search(&self, query: &str) -> Result<Vec<Node>> {
        self.search_with_limit(query, DEFAULT_SEARCH_LIMIT).await
    }

    /// Ranked full-text search with an explicit result cap.
    pub async fn search_with_limit(&self, query: &str, limit: i64) -> Result<Vec<Node>> {
        self.read(move |conn| search_nodes(conn, query, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    #[test]
    fn match_expression_quotes_and_prefixes() {
        assert_eq!(build_match_expression("rust"), "\"rust\"*");
        assert_eq!(build_match_expression("rust prog"), "\"rust\"* \"prog\"*");
        assert_eq!(build_match_expression("  spaced   out "), "\"spaced\"* \"out\"*");
        assert_eq!(build_match_expression(""), "");
    }

    #[test]
    fn match_expression_escapes_embedded_quotes() {
        assert_eq!(build_match_expression("say \"hi\""), "\"say\"* \"\"\"hi\"\"\"*");
    }

    #[test]
    fn match_expression_neutralizes_operators() {
        // FTS5 syntax in user input is treated as literal text.
        assert_eq!(build_match_expression("a OR b"), "\"a\"* \"OR\"* \"b\"*");
        assert_eq!(build_match_expression("col:value"), "\"col:value\"*");
    }

    async fn seeded_store() -> GraphStore {
        let store = GraphStore::open_in_memory().unwrap();
        for (id, name, content) in [
            ("n1", "Apple iPhone", "A smartphone made by Apple"),
            ("n2", "Android Phone", "A smartphone running Android"),
            ("n3", "Banana", "A yellow fruit"),
        ] {
            let mut node = Node::with_id(id, name);
            node.content = Some(content.into());
            store.create_node(node).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn search_matches_content_terms() {
        let store = seeded_store().await;

        let hits = store.search("smartphone").await.unwrap();
        let mut ids: Vec<_> = hits.iter().map(|n| n.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["n1", "n2"]);

        let hits = store.search("Banana").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n3");
    }

    #[tokio::test]
    async fn search_prefix_matches() {
        let store = seeded_store().await;
        let mut node = Node::with_id("n4", "Programming");
        node.content = Some("Writing code".into());
        store.create_node(node).await.unwrap();

        let hits = store.search("prog").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n4");
    }

    #[tokio::test]
    async fn search_excludes_soft_deleted() {
        let store = seeded_store().await;
        store.soft_delete_node("n3").await.unwrap();

        let hits = store.search("Banana").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_follows_updates() {
        let store = seeded_store().await;
        let mut node = store.get_node("n3").await.unwrap().unwrap();
        node.name = "Dragonfruit".into();
        store.update_node(&node).await.unwrap();

        assert!(store.search("Banana").await.unwrap().is_empty());
        let hits = store.search("Dragonfruit").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n3");
    }

    #[tokio::test]
    async fn name_matches_rank_above_content_matches() {
        let store = GraphStore::open_in_memory().unwrap();
        let mut by_content = Node::with_id("c", "Meeting notes");
        by_content.content = Some("discussed the kestrel project roadmap".into());
        store.create_node(by_content).await.unwrap();
        let by_name = Node::with_id("n", "Kestrel");
        store.create_node(by_name).await.unwrap();

        let hits = store.search("kestrel").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "n", "name hit should outrank content hit");
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let store = seeded_store().await;
        assert!(store.search("").await.unwrap().is_empty());
        assert!(store.search("   ").await.unwrap().is_empty());
    }
}
