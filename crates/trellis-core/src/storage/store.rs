//! Graph Store
//!
//! Owns the SQLite database file, its WAL side files, and the connection
//! pool. Callers never receive a raw connection; every public operation
//! suspends at the lease-acquisition point and runs a self-contained
//! closure underneath.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::model::SyncState;
use crate::storage::codec;
use crate::storage::migrations;
use crate::storage::pool::{ConnectionPool, DEFAULT_READERS};
use crate::txn::TransactionCoordinator;

/// Embedded labeled property graph store over SQLite
///
/// Single writer, many readers. Opened against a file path, the platform
/// data directory, or an anonymous temporary file for in-memory semantics.
pub struct GraphStore {
    pool: Arc<ConnectionPool>,
    coordinator: TransactionCoordinator,
    schema_version: u32,
    path: PathBuf,
    /// Keeps the anonymous database alive for in-memory mode
    _temp_dir: Option<tempfile::TempDir>,
}

impl GraphStore {
    /// Apply PRAGMAs to a connection. WAL is skipped for the anonymous
    /// temporary database backing in-memory mode.
    fn configure_connection(conn: &Connection, wal: bool) -> Result<()> {
        if wal {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| StoreError::Schema(format!("WAL setup failed: {e}")))?;
        }

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| StoreError::Schema(format!("PRAGMA setup failed: {e}")))?;

        Ok(())
    }

    fn open_at(path: PathBuf, wal: bool, temp_dir: Option<tempfile::TempDir>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Open writer connection and migrate before any reader exists.
        let writer = Connection::open(&path)?;

        // Restrict database file permissions to owner-only on Unix
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer, wal)?;
        migrations::apply_migrations(&writer)?;
        let schema_version = migrations::current_version(&writer);

        let reader_count = ConnectionPool::clamp_readers(DEFAULT_READERS);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let reader = Connection::open(&path)?;
            Self::configure_connection(&reader, false)?;
            readers.push(reader);
        }

        let pool = Arc::new(ConnectionPool::new(writer, readers));
        let coordinator = TransactionCoordinator::new(pool.clone());

        tracing::info!(
            path = %path.display(),
            schema_version,
            readers = reader_count,
            "graph store opened"
        );

        Ok(Self {
            pool,
            coordinator,
            schema_version,
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Open (or create) a store at the given path. WAL side files live in
    /// the same directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path.as_ref().to_path_buf(), true, None)
    }

    /// Open a store backed by an anonymous temporary file, dropped with the
    /// store. WAL is disabled in this mode.
    pub fn open_in_memory() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("trellis.db");
        Self::open_at(path, false, Some(dir))
    }

    /// Open the store at the platform default data directory.
    pub fn open_default() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "trellis", "core").ok_or_else(|| {
            StoreError::Schema("could not determine project directories".to_string())
        })?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        // Restrict directory permissions to owner-only on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            let _ = std::fs::set_permissions(data_dir, perms);
        }
        Self::open(data_dir.join("trellis.db"))
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// The transaction coordinator for this store. Use it to register
    /// change observers or run multi-record write scopes.
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub(crate) fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run a closure on a shared read lease. Reads never join write scopes.
    pub(crate) async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.pool.read(f).await
    }

    /// Run a closure on the write lease without opening a journal scope.
    /// Internal bookkeeping writes only.
    pub(crate) async fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.pool.write(f).await
    }

    // ========== Sync state ==========

    /// Current replication bookkeeping (the singleton row).
    pub async fn sync_state(&self) -> Result<SyncState> {
        self.read(|conn| {
            conn.query_row("SELECT * FROM sync_state WHERE id = 'default'", [], |row| {
                codec::sync_state_from_row(row)
            })
            .map_err(StoreError::from)
        })
        .await
    }

    // ========== Settings ==========

    /// Read a settings value.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.read(move |conn| {
            use rusqlite::OptionalExtension;
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Write a settings value (upsert).
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.pool
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    [key.as_str(), value.as_str()],
                )?;
                Ok(())
            })
            .await
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("path", &self.path)
            .field("schema_version", &self.schema_version)
            .finish()
    }
}
