//! Error Types
//!
//! Unified error type for the store. Transient busy/locked conditions map to
//! [`StoreError::Contention`] so the transaction coordinator can retry them;
//! everything else propagates to the caller unmodified.

use rusqlite::ErrorCode;

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// API invoked before the schema migrator has run
    #[error("store not initialized: run migrations before use")]
    NotInitialized,
    /// Schema DDL failed to load
    #[error("schema load failed: {0}")]
    Schema(String),
    /// A numbered migration step failed
    #[error("migration v{version} failed: {source}")]
    MigrationFailed {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },
    /// Underlying engine error enriched with the offending statement
    #[error("query failed ({sql}): {source}")]
    Query {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Busy/locked; retried automatically by the coordinator
    #[error("database contention (busy or locked)")]
    Contention,
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    /// Duplicate identity
    #[error("duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },
    /// No path between two nodes
    #[error("no path from {from} to {to}")]
    InvalidPath { from: String, to: String },
    /// Traversal detected a cycle it cannot exclude
    #[error("circular reference at {0}")]
    CircularReference(String),
    /// Propagated from the transaction coordinator
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    /// Transport-returned sync error; drives backoff
    #[error("sync transport error: {0}")]
    SyncTransport(String),
    /// Local and remote diverged at the same version; caller must resolve
    #[error("sync conflict on {id}: local v{local_version} vs remote v{remote_version}")]
    ConflictDetected {
        id: String,
        local_version: i64,
        remote_version: i64,
    },
    /// Rollback could not reverse-apply; state may be partial
    #[error("rollback of {tx_id} failed: {reason}")]
    RollbackFailed { tx_id: String, reason: String },
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encode/decode error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether this error is a transient busy/locked condition worth retrying.
    pub fn is_contention(&self) -> bool {
        match self {
            StoreError::Contention => true,
            StoreError::Database(e) => is_busy_or_locked(e),
            StoreError::Query { source, .. } => is_busy_or_locked(source),
            _ => false,
        }
    }

    /// Enrich an engine error with the statement that produced it.
    pub fn query(sql: impl Into<String>, source: rusqlite::Error) -> Self {
        if is_busy_or_locked(&source) {
            return StoreError::Contention;
        }
        StoreError::Query {
            sql: sql.into(),
            source,
        }
    }

    /// Map a unique-constraint violation to [`StoreError::Duplicate`].
    pub fn insert(entity: &'static str, id: &str, source: rusqlite::Error) -> Self {
        if is_constraint_violation(&source) {
            return StoreError::Duplicate {
                entity,
                id: id.to_string(),
            };
        }
        StoreError::from(source)
    }
}

fn is_busy_or_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::DatabaseBusy || err.code == ErrorCode::DatabaseLocked
    )
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    // Only uniqueness counts as a duplicate; foreign-key and check
    // violations stay generic engine errors.
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_detected_from_sqlite_code() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(StoreError::from(busy).is_contention());

        let plain = rusqlite::Error::InvalidQuery;
        assert!(!StoreError::from(plain).is_contention());
    }

    #[test]
    fn query_enrichment_preserves_contention() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(
            StoreError::query("SELECT 1", busy),
            StoreError::Contention
        ));
    }

    #[test]
    fn unique_constraint_maps_to_duplicate() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: nodes.id".into()),
        );
        match StoreError::insert("node", "n1", constraint) {
            StoreError::Duplicate { entity, id } => {
                assert_eq!(entity, "node");
                assert_eq!(id, "n1");
            }
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn foreign_key_violation_stays_generic() {
        let fk = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            Some("FOREIGN KEY constraint failed".into()),
        );
        assert!(matches!(
            StoreError::insert("edge", "e1", fk),
            StoreError::Database(_)
        ));
    }
}
