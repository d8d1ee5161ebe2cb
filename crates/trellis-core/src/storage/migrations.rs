//! Database Migrations
//!
//! Numbered, recorded schema migrations. On startup the migrator reads
//! `MAX(version)` from `schema_migrations` and applies everything newer in
//! order, recording each step. Running the migrator twice is a no-op.

use crate::error::{Result, StoreError};

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: nodes, edges, facets, FTS index, sync state",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Draft storage for rollback preservation",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description recorded in `schema_migrations`
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL DEFAULT 'note',
    name TEXT NOT NULL,
    content TEXT,
    summary TEXT,

    -- LATCH-L: location
    latitude REAL,
    longitude REAL,
    location_name TEXT,
    location_address TEXT,

    -- LATCH-T: time
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    due_at TEXT,
    completed_at TEXT,
    event_start TEXT,
    event_end TEXT,

    -- LATCH-C: category
    folder TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    status TEXT,

    -- LATCH-H: hierarchy
    priority INTEGER,
    importance INTEGER,
    sort_order INTEGER,

    -- Provenance
    source TEXT,
    source_id TEXT,
    source_url TEXT,

    -- Lifecycle
    deleted_at TEXT,
    version INTEGER NOT NULL DEFAULT 1,

    -- Sync
    sync_version INTEGER NOT NULL DEFAULT 1,
    last_synced_at TEXT,
    conflict_resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_nodes_folder ON nodes(folder);
CREATE INDEX IF NOT EXISTS idx_nodes_created ON nodes(created_at);
CREATE INDEX IF NOT EXISTS idx_nodes_modified ON nodes(modified_at);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
CREATE INDEX IF NOT EXISTS idx_nodes_active ON nodes(modified_at) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_source ON nodes(source, source_id)
    WHERE source IS NOT NULL AND source_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_nodes_synced ON nodes(last_synced_at);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    edge_type TEXT NOT NULL DEFAULT 'LINK',
    source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    label TEXT,
    weight REAL NOT NULL DEFAULT 1.0,
    directed INTEGER NOT NULL DEFAULT 1,
    sequence_order INTEGER,
    channel TEXT,
    timestamp TEXT,
    subject TEXT,
    sync_version INTEGER NOT NULL DEFAULT 1,
    last_synced_version INTEGER NOT NULL DEFAULT 0,
    UNIQUE (source_id, target_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(edge_type);

CREATE TABLE IF NOT EXISTS facets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    facet_type TEXT,
    query TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_facets_order ON facets(sort_order);

-- FTS5 contentless-shadow index over the node text fields
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    name, content, tags, folder,
    content='nodes',
    content_rowid='rowid',
    tokenize='porter unicode61 remove_diacritics 1'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(rowid, name, content, tags, folder)
    VALUES (NEW.rowid, NEW.name, NEW.content, NEW.tags, NEW.folder);
END;

CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, name, content, tags, folder)
    VALUES ('delete', OLD.rowid, OLD.name, OLD.content, OLD.tags, OLD.folder);
END;

CREATE TRIGGER IF NOT EXISTS nodes_au AFTER UPDATE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, name, content, tags, folder)
    VALUES ('delete', OLD.rowid, OLD.name, OLD.content, OLD.tags, OLD.folder);
    INSERT INTO nodes_fts(rowid, name, content, tags, folder)
    VALUES (NEW.rowid, NEW.name, NEW.content, NEW.tags, NEW.folder);
END;

CREATE TABLE IF NOT EXISTS sync_state (
    id TEXT PRIMARY KEY,
    last_sync_token BLOB,
    last_sync_at TEXT,
    pending_changes INTEGER NOT NULL DEFAULT 0,
    conflict_count INTEGER NOT NULL DEFAULT 0,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_error_at TEXT
);

INSERT OR IGNORE INTO sync_state (id) VALUES ('default');

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Migration tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
);
"#;

/// V2: Draft storage for the rollback manager
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS draft_storage (
    draft_id TEXT PRIMARY KEY,
    original_tx_id TEXT NOT NULL,
    operations TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_drafts_expiry ON draft_storage(expires_at);
"#;

/// Get current schema version from the database
pub fn current_version(conn: &rusqlite::Connection) -> u32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Apply pending migrations, returning how many ran
pub fn apply_migrations(conn: &rusqlite::Connection) -> Result<u32> {
    let from_version = current_version(conn);
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > from_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            // execute_batch handles multi-statement SQL including triggers
            conn.execute_batch(migration.up)
                .map_err(|e| StoreError::MigrationFailed {
                    version: migration.version,
                    source: e,
                })?;

            conn.execute(
                "INSERT OR REPLACE INTO schema_migrations (version, applied_at, description)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    chrono::Utc::now().to_rfc3339(),
                    migration.description,
                ],
            )
            .map_err(|e| StoreError::MigrationFailed {
                version: migration.version,
                source: e,
            })?;

            applied += 1;
        }
    }

    Ok(applied)
}
