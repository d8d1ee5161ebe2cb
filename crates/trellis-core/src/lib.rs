//! # Trellis Core
//!
//! Embedded, thread-safe labeled property graph store on SQLite:
//!
//! - **LATCH data model**: nodes carry Location / Alphabet / Time /
//!   Category / Hierarchy attributes; typed edges (`LINK`, `NEST`,
//!   `SEQUENCE`, `AFFINITY`) carry weights and direction
//! - **Single writer, many readers**: every public API suspends at the
//!   lease-acquisition point; raw connections never escape the pool
//! - **Full-text search**: FTS5 contentless-shadow index with BM25 column
//!   weighting and soft-delete filtering
//! - **Graph algorithms**: recursive-CTE reachability and shortest paths,
//!   neighborhood extraction, inbound-weight centrality, in-memory
//!   Dijkstra and PageRank over consistent read snapshots
//! - **Bidirectional sync**: push/pull against any remote record store via
//!   the [`SyncTransport`] capability, with version-based last-writer-wins,
//!   incremental change tokens, and exponential-backoff retry
//! - **Rollback with drafts**: journaled write transactions can be
//!   reverse-applied after a downstream failure, preserving the
//!   recoverable subset for 24 hours
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis_core::{Edge, EdgeType, GraphStore, Node};
//!
//! let store = GraphStore::open("graph.db")?;
//!
//! let a = store.create_node(Node::new("Pressure valve")).await?;
//! let b = store.create_node(Node::new("Relief line")).await?;
//! store.create_edge(Edge::new(EdgeType::Link, &a.id, &b.id)).await?;
//!
//! let hits = store.search("valve").await?;
//! let ranked = store.page_rank().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite from source instead of
//!   linking the system library

// ============================================================================
// MODULES
// ============================================================================

pub mod error;
pub mod graph;
pub mod model;
pub mod rollback;
pub mod storage;
pub mod sync;
pub mod txn;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{Result, StoreError};

// Data model
pub use model::{Edge, EdgeType, Facet, Node, SyncState, SyncStatus};

// Storage layer
pub use storage::{GraphStore, DEFAULT_SEARCH_LIMIT};

// Transaction coordination
pub use txn::{ChangeEvent, ChangeObserver, ChangeOp, TransactionCoordinator, TxnScope};

// Graph algorithms
pub use graph::{
    Reachable, WeightedPath, DEFAULT_DAMPING, DEFAULT_ITERATIONS, DEFAULT_MAX_PATH_DEPTH,
};

// Sync layer
pub use sync::{
    ModifyOutcome, RecordId, RecordOutcome, RecordType, RemoteRecord, SavePolicy, SyncManager,
    SyncReport, SyncTransport, SyncVersionBatch, TransportError, TransportResult, ZoneChanges,
};

// Rollback layer
pub use rollback::{
    snapshot_row, DraftInfo, OperationType, RollbackManager, RollbackResult, TrackedTransaction,
    TransactionOperation, DRAFT_RETENTION_HOURS, MAX_DRAFT_OPERATIONS,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Edge, EdgeType, Facet, GraphStore, Node, Result, StoreError, SyncManager, SyncStatus,
        SyncTransport,
    };

    pub use crate::{RollbackManager, TrackedTransaction};

    pub use crate::{Reachable, WeightedPath};
}
