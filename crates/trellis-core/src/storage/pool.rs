//! Connection Pool
//!
//! Exactly one writer at a time, many readers in parallel. The writer sits
//! behind a single async mutex; readers are separate connections dispatched
//! round-robin, each behind its own lease. Acquiring a lease suspends the
//! caller until it is granted; abandoning the future before the grant is the
//! cancellation point. Closures run against a handle must be self-contained
//! and finite - no connection ever escapes the pool.

use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// Default number of reader connections
pub const DEFAULT_READERS: usize = 4;

/// Upper bound on reader connections
pub const MAX_READERS: usize = 8;

/// Single-writer / multi-reader connection pool
pub struct ConnectionPool {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl ConnectionPool {
    /// Build a pool from an already-configured writer and reader set.
    pub fn new(writer: Connection, readers: Vec<Connection>) -> Self {
        debug_assert!(!readers.is_empty());
        Self {
            writer: Mutex::new(writer),
            readers: readers.into_iter().map(Mutex::new).collect(),
            next_reader: AtomicUsize::new(0),
        }
    }

    /// Clamp a requested reader count to the supported range.
    pub fn clamp_readers(requested: usize) -> usize {
        requested.clamp(1, MAX_READERS)
    }

    /// Run a closure on the serialized write lease.
    pub async fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.writer.lock().await;
        f(&conn)
    }

    /// Run a closure on a shared read lease.
    ///
    /// Readers rotate through the pool so concurrent reads land on distinct
    /// connections and do not block each other.
    pub async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx].lock().await;
        f(&conn)
    }

    /// Acquire the write lease itself. Transaction coordinator use only;
    /// the guard must not outlive the scope that acquired it.
    pub(crate) async fn writer_lease(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().await
    }

    /// Number of reader connections in the pool.
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("readers", &self.readers.len())
            .finish()
    }
}
