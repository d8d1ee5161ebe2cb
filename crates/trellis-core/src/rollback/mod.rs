//! Rollback Manager
//!
//! Logical rollback for committed write transactions. Callers journal each
//! operation (with before/after row images keyed by column name) into a
//! [`TrackedTransaction`]; when the surrounding work fails after the local
//! commit - a remote push, a multi-step import - the manager reverse-applies
//! the journal in one write scope and preserves the recoverable subset as a
//! draft with a 24-hour retention window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::storage::codec;
use crate::storage::GraphStore;
use crate::txn::ChangeOp;

/// How long preserved drafts stay recoverable, in hours
pub const DRAFT_RETENTION_HOURS: i64 = 24;

/// Hard cap on operations preserved per draft
pub const MAX_DRAFT_OPERATIONS: usize = 1000;

/// Soft time budget for a rollback; exceeding it logs a warning
const ROLLBACK_TIME_BUDGET: Duration = Duration::from_millis(50);

/// Tables the journal may reference
const JOURNALED_TABLES: &[&str] = &["nodes", "edges", "facets"];

/// What a journaled operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    /// Set-based update without per-row images; never reversible
    BulkUpdate,
}

/// One journaled write, with row images keyed by column name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOperation {
    pub id: String,
    pub op_type: OperationType,
    pub table: String,
    pub record_id: Option<String>,
    pub before: Option<Map<String, Value>>,
    pub after: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionOperation {
    fn new(op_type: OperationType, table: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            op_type,
            table: table.to_string(),
            record_id: None,
            before: None,
            after: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this operation carries enough state to survive as a draft:
    /// inserts need `after`, updates need both images and a record id,
    /// deletes need `before` and a record id. Bulk updates never qualify.
    pub fn is_safe_for_preservation(&self) -> bool {
        match self.op_type {
            OperationType::Insert => self.after.is_some(),
            OperationType::Update => {
                self.before.is_some() && self.after.is_some() && self.record_id.is_some()
            }
            OperationType::Delete => self.before.is_some() && self.record_id.is_some(),
            OperationType::BulkUpdate => false,
        }
    }
}

/// A write transaction under rollback tracking
#[derive(Debug, Clone)]
pub struct TrackedTransaction {
    pub tx_id: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub operations: Vec<TransactionOperation>,
}

impl TrackedTransaction {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            tx_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.into(),
            started_at: Utc::now(),
            operations: Vec::new(),
        }
    }

    pub fn record_insert(
        &mut self,
        table: &str,
        record_id: impl Into<String>,
        after: Map<String, Value>,
    ) {
        let mut op = TransactionOperation::new(OperationType::Insert, table);
        op.record_id = Some(record_id.into());
        op.after = Some(after);
        self.operations.push(op);
    }

    pub fn record_update(
        &mut self,
        table: &str,
        record_id: impl Into<String>,
        before: Map<String, Value>,
        after: Map<String, Value>,
    ) {
        let mut op = TransactionOperation::new(OperationType::Update, table);
        op.record_id = Some(record_id.into());
        op.before = Some(before);
        op.after = Some(after);
        self.operations.push(op);
    }

    pub fn record_delete(
        &mut self,
        table: &str,
        record_id: impl Into<String>,
        before: Map<String, Value>,
    ) {
        let mut op = TransactionOperation::new(OperationType::Delete, table);
        op.record_id = Some(record_id.into());
        op.before = Some(before);
        self.operations.push(op);
    }

    pub fn record_bulk_update(&mut self, table: &str) {
        self.operations
            .push(TransactionOperation::new(OperationType::BulkUpdate, table));
    }
}

/// The recoverable subset of a rolled-back transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftInfo {
    pub draft_id: String,
    pub original_tx_id: String,
    pub preserved_operations: Vec<TransactionOperation>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a rollback attempt
#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub tx_id: String,
    pub success: bool,
    pub duration: Duration,
    pub preserved_draft_id: Option<String>,
    pub operations_rolled_back: u32,
    pub error: Option<String>,
}

/// Journaling layer above the transaction coordinator
pub struct RollbackManager {
    store: Arc<GraphStore>,
    active: Mutex<HashMap<String, TrackedTransaction>>,
    drafts: Mutex<HashMap<String, DraftInfo>>,
}

impl RollbackManager {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            active: Mutex::new(HashMap::new()),
            drafts: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a write transaction.
    pub fn track(&self, tx: TrackedTransaction) {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tx.tx_id.clone(), tx);
    }

    /// Finish a tracked transaction normally, dropping its journal.
    pub fn complete(&self, tx_id: &str) -> Option<TrackedTransaction> {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(tx_id)
    }

    /// Number of transactions currently tracked.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Reverse-apply a tracked transaction.
    ///
    /// With `preserve_drafts`, the safe subset of the journal is persisted
    /// first (capped at [`MAX_DRAFT_OPERATIONS`]). Operations then unwind
    /// newest-first in a single write scope; a reverse-apply failure is
    /// reported in the result rather than thrown. An unknown `tx_id` is
    /// [`StoreError::RollbackFailed`].
    pub async fn rollback(&self, tx_id: &str, preserve_drafts: bool) -> Result<RollbackResult> {
        let started = Instant::now();

        let tx = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(tx_id)
            .ok_or_else(|| StoreError::RollbackFailed {
                tx_id: tx_id.to_string(),
                reason: "transaction is not tracked".to_string(),
            })?;

        let draft = if preserve_drafts {
            match self.preserve_draft(&tx).await {
                Ok(draft) => draft,
                Err(e) => {
                    tracing::warn!(tx_id, error = %e, "draft preservation failed");
                    None
                }
            }
        } else {
            None
        };

        let correlation_id = format!("rollback/{tx_id}");
        let reversed = self
            .store
            .coordinator()
            .execute_in_transaction(&correlation_id, |scope| {
                let mut reversed = 0u32;
                for op in tx.operations.iter().rev() {
                    if reverse_apply(scope.conn(), op)? {
                        reversed += 1;
                        scope.record(
                            journaled_table(&op.table)?,
                            reverse_change_op(op.op_type),
                            op.record_id.clone(),
                        );
                    }
                }
                Ok(reversed)
            })
            .await;

        let duration = started.elapsed();
        if duration > ROLLBACK_TIME_BUDGET {
            tracing::warn!(
                tx_id,
                duration_ms = duration.as_millis() as u64,
                budget_ms = ROLLBACK_TIME_BUDGET.as_millis() as u64,
                "rollback exceeded time budget"
            );
        }

        let result = match reversed {
            Ok(operations_rolled_back) => RollbackResult {
                tx_id: tx.tx_id.clone(),
                success: true,
                duration,
                preserved_draft_id: draft.as_ref().map(|d| d.draft_id.clone()),
                operations_rolled_back,
                error: None,
            },
            Err(e) => RollbackResult {
                tx_id: tx.tx_id.clone(),
                success: false,
                duration,
                preserved_draft_id: draft.as_ref().map(|d| d.draft_id.clone()),
                operations_rolled_back: 0,
                error: Some(e.to_string()),
            },
        };

        tracing::info!(
            tx_id,
            success = result.success,
            operations = result.operations_rolled_back,
            duration_ms = duration.as_millis() as u64,
            draft = result.preserved_draft_id.as_deref().unwrap_or(""),
            "rollback finished"
        );
        Ok(result)
    }

    async fn preserve_draft(&self, tx: &TrackedTransaction) -> Result<Option<DraftInfo>> {
        let preserved: Vec<TransactionOperation> = tx
            .operations
            .iter()
            .filter(|op| op.is_safe_for_preservation())
            .take(MAX_DRAFT_OPERATIONS)
            .cloned()
            .collect();

        if preserved.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let draft = DraftInfo {
            draft_id: Uuid::new_v4().to_string(),
            original_tx_id: tx.tx_id.clone(),
            preserved_operations: preserved,
            created_at: now,
            expires_at: now + chrono::Duration::hours(DRAFT_RETENTION_HOURS),
        };

        let operations_json = serde_json::to_string(&draft.preserved_operations)?;
        let row = (
            draft.draft_id.clone(),
            draft.original_tx_id.clone(),
            operations_json,
            codec::ts_to_sql(&draft.created_at),
            codec::ts_to_sql(&draft.expires_at),
        );
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO draft_storage
                        (draft_id, original_tx_id, operations, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.0, row.1, row.2, row.3, row.4],
                )?;
                Ok(())
            })
            .await?;

        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(draft.draft_id.clone(), draft.clone());
        Ok(Some(draft))
    }

    /// A preserved draft by id, if it has not expired.
    pub fn get_draft(&self, draft_id: &str) -> Option<DraftInfo> {
        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(draft_id)
            .cloned()
    }

    /// All drafts currently held in memory.
    pub fn list_drafts(&self) -> Vec<DraftInfo> {
        self.drafts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Reload unexpired drafts persisted by earlier sessions.
    pub async fn load_persisted_drafts(&self) -> Result<usize> {
        let cutoff = codec::ts_to_sql(&Utc::now());
        let loaded: Vec<DraftInfo> = self
            .store
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT draft_id, original_tx_id, operations, created_at, expires_at
                     FROM draft_storage WHERE expires_at > ?1",
                )?;
                let rows = stmt.query_map([cutoff.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?;

                let mut drafts = Vec::new();
                for row in rows {
                    let (draft_id, original_tx_id, operations, created_at, expires_at) = row?;
                    let preserved_operations = serde_json::from_str(&operations)?;
                    let created_at = DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now());
                    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now());
                    drafts.push(DraftInfo {
                        draft_id,
                        original_tx_id,
                        preserved_operations,
                        created_at,
                        expires_at,
                    });
                }
                Ok(drafts)
            })
            .await?;

        let count = loaded.len();
        let mut drafts = self.drafts.lock().unwrap_or_else(|p| p.into_inner());
        for draft in loaded {
            drafts.insert(draft.draft_id.clone(), draft);
        }
        Ok(count)
    }

    /// Drop expired drafts from memory and storage.
    pub async fn prune_expired_drafts(&self) -> Result<u64> {
        self.prune_expired_at(Utc::now()).await
    }

    async fn prune_expired_at(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        {
            let mut drafts = self.drafts.lock().unwrap_or_else(|p| p.into_inner());
            drafts.retain(|_, draft| draft.expires_at > cutoff);
        }

        let stamp = codec::ts_to_sql(&cutoff);
        let pruned = self
            .store
            .write(move |conn| {
                let pruned = conn.execute(
                    "DELETE FROM draft_storage WHERE expires_at <= ?1",
                    [stamp.as_str()],
                )?;
                Ok(pruned as u64)
            })
            .await?;

        if pruned > 0 {
            tracing::debug!(pruned, "expired drafts removed");
        }
        Ok(pruned)
    }

    /// Spawn the background retention pass.
    pub fn spawn_retention_task(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.prune_expired_drafts().await {
                    tracing::warn!(error = %e, "draft retention pass failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for RollbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackManager")
            .field("active", &self.active_count())
            .finish()
    }
}

// ========== Reverse-apply ==========

fn journaled_table(table: &str) -> Result<&'static str> {
    JOURNALED_TABLES
        .iter()
        .find(|t| **t == table)
        .copied()
        .ok_or_else(|| StoreError::TransactionFailed(format!("table {table} is not journaled")))
}

fn reverse_change_op(op_type: OperationType) -> ChangeOp {
    match op_type {
        OperationType::Insert => ChangeOp::Delete,
        OperationType::Update | OperationType::BulkUpdate => ChangeOp::Update,
        OperationType::Delete => ChangeOp::Insert,
    }
}

/// Undo one journaled operation. Returns false when the operation is
/// skipped (bulk updates).
fn reverse_apply(conn: &Connection, op: &TransactionOperation) -> Result<bool> {
    let table = journaled_table(&op.table)?;

    match op.op_type {
        OperationType::Insert => {
            let id = op
                .record_id
                .clone()
                .or_else(|| {
                    op.after
                        .as_ref()
                        .and_then(|a| a.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .ok_or_else(|| {
                    StoreError::TransactionFailed(format!(
                        "insert on {table} has no record id to reverse"
                    ))
                })?;
            let sql = format!("DELETE FROM {table} WHERE id = ?1");
            conn.execute(&sql, params![id])?;
            Ok(true)
        }
        OperationType::Update => {
            let (Some(record_id), Some(before)) = (&op.record_id, &op.before) else {
                return Err(StoreError::TransactionFailed(format!(
                    "update on {table} is missing its before image"
                )));
            };
            write_row_values(conn, table, record_id, before)?;
            Ok(true)
        }
        OperationType::Delete => {
            let Some(before) = &op.before else {
                return Err(StoreError::TransactionFailed(format!(
                    "delete on {table} is missing its before image"
                )));
            };
            reinsert_row(conn, table, before)?;
            Ok(true)
        }
        OperationType::BulkUpdate => {
            tracing::warn!(table, "bulk update is not reversible, skipping");
            Ok(false)
        }
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => n
            .as_i64()
            .map(Sql::Integer)
            .unwrap_or_else(|| Sql::Real(n.as_f64().unwrap_or(0.0))),
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

/// Restore recorded column values for one row.
fn write_row_values(
    conn: &Connection,
    table: &str,
    record_id: &str,
    values: &Map<String, Value>,
) -> Result<()> {
    let columns: Vec<&String> = values.keys().filter(|k| k.as_str() != "id").collect();
    if columns.is_empty() {
        return Ok(());
    }

    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("\"{}\" = ?{}", column, i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {table} SET {assignments} WHERE id = ?1");

    let mut bound = Vec::with_capacity(columns.len() + 1);
    bound.push(rusqlite::types::Value::Text(record_id.to_string()));
    for column in &columns {
        bound.push(to_sql_value(&values[column.as_str()]));
    }
    conn.execute(&sql, params_from_iter(bound))
        .map_err(|e| StoreError::query(sql, e))?;
    Ok(())
}

/// Re-insert a deleted row from its recorded image.
fn reinsert_row(conn: &Connection, table: &str, values: &Map<String, Value>) -> Result<()> {
    let columns: Vec<&String> = values.keys().collect();
    let column_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT OR REPLACE INTO {table} ({column_list}) VALUES ({placeholders})");

    let bound: Vec<rusqlite::types::Value> = columns
        .iter()
        .map(|column| to_sql_value(&values[column.as_str()]))
        .collect();
    conn.execute(&sql, params_from_iter(bound))
        .map_err(|e| StoreError::query(sql, e))?;
    Ok(())
}

/// Capture a row image keyed by column name, for journaling.
pub fn snapshot_row(
    conn: &Connection,
    table: &str,
    id: &str,
) -> Result<Option<Map<String, Value>>> {
    let table = journaled_table(table)?;
    let sql = format!("SELECT * FROM {table} WHERE id = ?1");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let stmt_ref = row.as_ref();
    let mut image = Map::new();
    for index in 0..stmt_ref.column_count() {
        let name = stmt_ref.column_name(index)?.to_string();
        let value = match row.get_ref(index)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
        };
        image.insert(name, value);
    }
    Ok(Some(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;

    async fn tracked_name_update(
        store: &Arc<GraphStore>,
        manager: &RollbackManager,
        id: &str,
        new_name: &str,
    ) -> String {
        let mut tx = TrackedTransaction::new(format!("test.update/{id}"));
        let correlation_id = tx.correlation_id.clone();
        store
            .coordinator()
            .execute_in_transaction(&correlation_id, |scope| {
                let before = snapshot_row(scope.conn(), "nodes", id)?.expect("row exists");
                scope.conn().execute(
                    "UPDATE nodes SET name = ?2 WHERE id = ?1",
                    params![id, new_name],
                )?;
                let after = snapshot_row(scope.conn(), "nodes", id)?.expect("row exists");
                tx.record_update("nodes", id, before, after);
                scope.record("nodes", ChangeOp::Update, Some(id.to_string()));
                Ok(())
            })
            .await
            .unwrap();

        let tx_id = tx.tx_id.clone();
        manager.track(tx);
        tx_id
    }

    #[tokio::test]
    async fn rollback_restores_updated_rows_and_preserves_draft() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        store.create_node(Node::with_id("a", "Alpha")).await.unwrap();
        let tx_id = tracked_name_update(&store, &manager, "a", "Broken").await;
        assert_eq!(store.get_node("a").await.unwrap().unwrap().name, "Broken");

        let result = manager.rollback(&tx_id, true).await.unwrap();
        assert!(result.success);
        assert_eq!(result.operations_rolled_back, 1);
        assert_eq!(store.get_node("a").await.unwrap().unwrap().name, "Alpha");

        let draft_id = result.preserved_draft_id.expect("draft preserved");
        let draft = manager.get_draft(&draft_id).unwrap();
        assert_eq!(draft.original_tx_id, tx_id);
        assert_eq!(draft.preserved_operations.len(), 1);
        let op = &draft.preserved_operations[0];
        assert!(op.before.is_some() && op.after.is_some());
        assert_eq!(
            op.after.as_ref().unwrap().get("name"),
            Some(&Value::String("Broken".into()))
        );
    }

    #[tokio::test]
    async fn rollback_of_insert_deletes_the_row() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        store.create_node(Node::with_id("n", "New")).await.unwrap();
        let mut tx = TrackedTransaction::new("test.insert");
        let after = store
            .read(|conn| snapshot_row(conn, "nodes", "n"))
            .await
            .unwrap()
            .unwrap();
        tx.record_insert("nodes", "n", after);
        let tx_id = tx.tx_id.clone();
        manager.track(tx);

        let result = manager.rollback(&tx_id, false).await.unwrap();
        assert!(result.success);
        assert!(result.preserved_draft_id.is_none());
        assert!(store.get_node_including_deleted("n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rollback_of_delete_reinserts_the_row() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        let mut node = Node::with_id("n", "Keep me");
        node.folder = Some("important".into());
        store.create_node(node).await.unwrap();

        let before = store
            .read(|conn| snapshot_row(conn, "nodes", "n"))
            .await
            .unwrap()
            .unwrap();
        store.purge_node("n").await.unwrap();

        let mut tx = TrackedTransaction::new("test.delete");
        tx.record_delete("nodes", "n", before);
        let tx_id = tx.tx_id.clone();
        manager.track(tx);

        let result = manager.rollback(&tx_id, true).await.unwrap();
        assert!(result.success);

        let restored = store.get_node("n").await.unwrap().unwrap();
        assert_eq!(restored.name, "Keep me");
        assert_eq!(restored.folder.as_deref(), Some("important"));
    }

    #[tokio::test]
    async fn operations_unwind_in_reverse_order() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        store.create_node(Node::with_id("a", "One")).await.unwrap();
        let mut tx = TrackedTransaction::new("test.two_step");

        // Two stacked renames; reverse order must land back on "One".
        for new_name in ["Two", "Three"] {
            store
                .coordinator()
                .execute_in_transaction("test.two_step", |scope| {
                    let before = snapshot_row(scope.conn(), "nodes", "a")?.expect("row");
                    scope.conn().execute(
                        "UPDATE nodes SET name = ?1 WHERE id = 'a'",
                        params![new_name],
                    )?;
                    let after = snapshot_row(scope.conn(), "nodes", "a")?.expect("row");
                    tx.record_update("nodes", "a", before, after);
                    Ok(())
                })
                .await
                .unwrap();
        }

        let tx_id = tx.tx_id.clone();
        manager.track(tx);
        let result = manager.rollback(&tx_id, false).await.unwrap();
        assert_eq!(result.operations_rolled_back, 2);
        assert_eq!(store.get_node("a").await.unwrap().unwrap().name, "One");
    }

    #[tokio::test]
    async fn bulk_updates_are_skipped_not_reversed() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        let mut tx = TrackedTransaction::new("test.bulk");
        tx.record_bulk_update("nodes");
        assert!(!tx.operations[0].is_safe_for_preservation());
        let tx_id = tx.tx_id.clone();
        manager.track(tx);

        let result = manager.rollback(&tx_id, true).await.unwrap();
        assert!(result.success);
        assert_eq!(result.operations_rolled_back, 0);
        assert!(result.preserved_draft_id.is_none(), "bulk ops are never drafted");
    }

    #[tokio::test]
    async fn unknown_transaction_is_rollback_failed() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store);

        let err = manager.rollback("ghost", true).await.unwrap_err();
        assert!(matches!(err, StoreError::RollbackFailed { .. }));
    }

    #[tokio::test]
    async fn complete_drops_tracking() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store);

        let tx = TrackedTransaction::new("test.complete");
        let tx_id = tx.tx_id.clone();
        manager.track(tx);
        assert_eq!(manager.active_count(), 1);

        assert!(manager.complete(&tx_id).is_some());
        assert_eq!(manager.active_count(), 0);
        assert!(manager.rollback(&tx_id, false).await.is_err());
    }

    #[tokio::test]
    async fn expired_drafts_are_pruned_from_memory_and_storage() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        store.create_node(Node::with_id("a", "Alpha")).await.unwrap();
        let tx_id = tracked_name_update(&store, &manager, "a", "Edited").await;
        let result = manager.rollback(&tx_id, true).await.unwrap();
        let draft_id = result.preserved_draft_id.unwrap();

        // Still alive now.
        manager.prune_expired_drafts().await.unwrap();
        assert!(manager.get_draft(&draft_id).is_some());

        // Gone once the retention window passes.
        let pruned = manager
            .prune_expired_at(
                Utc::now()
                    + chrono::Duration::hours(DRAFT_RETENTION_HOURS)
                    + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(manager.get_draft(&draft_id).is_none());

        let remaining: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM draft_storage", [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn persisted_drafts_reload_across_managers() {
        let store = Arc::new(GraphStore::open_in_memory().unwrap());
        let manager = RollbackManager::new(store.clone());

        store.create_node(Node::with_id("a", "Alpha")).await.unwrap();
        let tx_id = tracked_name_update(&store, &manager, "a", "Edited").await;
        let result = manager.rollback(&tx_id, true).await.unwrap();
        let draft_id = result.preserved_draft_id.unwrap();

        let fresh = RollbackManager::new(store);
        assert!(fresh.get_draft(&draft_id).is_none());
        let loaded = fresh.load_persisted_drafts().await.unwrap();
        assert_eq!(loaded, 1);
        assert!(fresh.get_draft(&draft_id).is_some());
    }
}
