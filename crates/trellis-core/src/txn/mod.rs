//! Transaction Coordinator
//!
//! Wraps writes in flat-nested scopes over the single write lease. A scope
//! records a journal of change events which is handed to observers only
//! after the outer commit; a rollback discards it. Top-level write scopes
//! open with `BEGIN IMMEDIATE` so a reader connection never has to upgrade
//! to a writer mid-transaction. Busy/locked errors are retried with
//! exponential backoff by [`TransactionCoordinator::execute_with_retry`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::storage::pool::ConnectionPool;

/// Retries after the initial attempt
const MAX_RETRIES: u32 = 3;

/// First backoff step; doubles per retry (200, 400, 800 ms)
const BASE_BACKOFF_MS: u64 = 200;

/// What a change event did to its row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }
}

/// One committed mutation, aggregated per scope
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: &'static str,
    pub op: ChangeOp,
    pub record_id: Option<String>,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives committed change events, one call per event
pub trait ChangeObserver: Send + Sync {
    fn notify_change(&self, event: &ChangeEvent);
}

/// An active write scope
///
/// Handed to the transaction closure. Nested work joins this scope through
/// [`TxnScope::nested`] - flat nesting, no savepoints, one shared journal.
pub struct TxnScope<'a> {
    conn: &'a Connection,
    scope_id: String,
    correlation_id: String,
    started_at: DateTime<Utc>,
    depth: u32,
    operation_count: u32,
    journal: Vec<ChangeEvent>,
}

impl<'a> TxnScope<'a> {
    fn new(conn: &'a Connection, correlation_id: &str) -> Self {
        Self {
            conn,
            scope_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.to_string(),
            started_at: Utc::now(),
            depth: 0,
            operation_count: 0,
            journal: Vec::new(),
        }
    }

    /// The connection backing this scope.
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn operation_count(&self) -> u32 {
        self.operation_count
    }

    /// Append a change event to the scope journal, in call order.
    pub fn record(&mut self, table: &'static str, op: ChangeOp, record_id: Option<String>) {
        self.operation_count += 1;
        self.journal.push(ChangeEvent {
            table,
            op,
            record_id,
            correlation_id: self.correlation_id.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Join the active scope with a child correlation id (flat nesting).
    ///
    /// The child shares this scope's transaction and journal; its events
    /// carry the child correlation id. No savepoint is created - an error
    /// unwinds the whole scope.
    pub fn nested<T>(
        &mut self,
        correlation_id: &str,
        op: impl FnOnce(&mut TxnScope<'a>) -> Result<T>,
    ) -> Result<T> {
        let parent = std::mem::replace(&mut self.correlation_id, correlation_id.to_string());
        self.depth += 1;
        let result = op(self);
        self.depth -= 1;
        self.correlation_id = parent;
        result
    }
}

/// Serializes write scopes over the pool's write lease
pub struct TransactionCoordinator {
    pool: Arc<ConnectionPool>,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl TransactionCoordinator {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for committed change events.
    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    /// Run `op` in a write scope.
    ///
    /// Acquires the write lease (suspension point), issues `BEGIN IMMEDIATE`,
    /// runs the closure, commits, then flushes the journal to observers.
    /// Any error rolls the scope back, discards the journal, and propagates
    /// unmodified.
    pub async fn execute_in_transaction<T>(
        &self,
        correlation_id: &str,
        op: impl FnOnce(&mut TxnScope<'_>) -> Result<T>,
    ) -> Result<T> {
        let (value, journal) = {
            let conn = self.pool.writer_lease().await;
            // A panicked scope can leave the connection mid-transaction.
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
            conn.execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| StoreError::query("BEGIN IMMEDIATE", e))?;

            let mut scope = TxnScope::new(&conn, correlation_id);
            tracing::debug!(
                scope_id = %scope.scope_id,
                correlation_id,
                "write scope opened"
            );

            match op(&mut scope) {
                Ok(value) => {
                    if let Err(e) = conn.execute_batch("COMMIT") {
                        let _ = conn.execute_batch("ROLLBACK");
                        return Err(StoreError::query("COMMIT", e));
                    }
                    tracing::debug!(
                        scope_id = %scope.scope_id,
                        operations = scope.operation_count,
                        "write scope committed"
                    );
                    (value, std::mem::take(&mut scope.journal))
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    tracing::debug!(
                        scope_id = %scope.scope_id,
                        error = %e,
                        "write scope rolled back, journal discarded"
                    );
                    return Err(e);
                }
            }
        };

        self.flush(&journal);
        Ok(value)
    }

    /// Run `op` in a write scope, retrying busy/locked errors.
    ///
    /// Up to three retries with 200/400/800 ms backoff; any other error, or
    /// contention past the last retry, is surfaced.
    pub async fn execute_with_retry<T>(
        &self,
        correlation_id: &str,
        op: impl Fn(&mut TxnScope<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut retries = 0u32;
        loop {
            match self.execute_in_transaction(correlation_id, &op).await {
                Err(e) if e.is_contention() && retries < MAX_RETRIES => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS << retries);
                    tracing::debug!(
                        correlation_id,
                        retry = retries + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying contended write scope"
                    );
                    tokio::time::sleep(backoff).await;
                    retries += 1;
                }
                other => return other,
            }
        }
    }

    fn flush(&self, journal: &[ChangeEvent]) {
        let observers = match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(_) => return,
        };
        for event in journal {
            for observer in &observers {
                observer.notify_change(event);
            }
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator").finish()
    }
}
