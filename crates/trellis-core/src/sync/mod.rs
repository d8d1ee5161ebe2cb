//! Bidirectional Sync
//!
//! Replicates nodes and edges against a remote record store through the
//! [`SyncTransport`] capability. The manager owns the push/pull state
//! machine, version-based conflict handling, and the sync bookkeeping row.

mod manager;
mod transport;

pub use manager::{SyncManager, SyncReport, SyncVersionBatch};
pub use transport::{
    ModifyOutcome, RecordId, RecordOutcome, RecordType, RemoteRecord, SavePolicy, SyncTransport,
    TransportError, TransportResult, ZoneChanges,
};
