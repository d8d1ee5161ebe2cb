//! Sync Manager
//!
//! Bidirectional replication against a [`SyncTransport`] zone. One sync
//! runs at a time (`idle -> syncing -> {idle | error | offline}`); re-entry
//! while syncing is a no-op. Push sends locally modified nodes and edges as
//! a non-atomic changed-keys batch; pull applies server changes under a
//! version-based last-writer-wins gate and commits them together with the
//! new change token in a single write scope, so observers never see a
//! half-applied cursor. Failures are recorded in `sync_state` and retried
//! with exponential backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::{Edge, Node, SyncStatus};
use crate::storage::codec;
use crate::storage::GraphStore;
use crate::txn::ChangeOp;

use super::transport::{
    RecordType, RemoteRecord, SavePolicy, SyncTransport, TransportError, ZoneChanges,
};

/// Consecutive failures before a sync call stops retrying
const MAX_SYNC_FAILURES: i64 = 3;

/// Subscription id used for change notifications
const SUBSCRIPTION_ID: &str = "trellis-zone-changes";

/// Counters from one completed sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records accepted by the remote
    pub pushed: u64,
    /// Remote changes applied locally
    pub pulled: u64,
    /// Remote deletions applied locally
    pub deleted: u64,
    /// Equal-version divergences left for the caller to resolve
    pub conflicts: u64,
}

impl SyncReport {
    /// True when the pass moved no data in either direction.
    pub fn is_noop(&self) -> bool {
        self.pushed == 0 && self.pulled == 0 && self.deleted == 0
    }
}

/// Prior `sync_version` values captured before a sync-safe write
#[derive(Debug, Clone, Default)]
pub struct SyncVersionBatch {
    versions: HashMap<String, i64>,
}

impl SyncVersionBatch {
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

enum SyncFailure {
    Transport(TransportError),
    Store(StoreError),
}

impl SyncFailure {
    fn is_offline(&self) -> bool {
        matches!(self, SyncFailure::Transport(TransportError::Offline(_)))
    }

    fn into_store(self) -> StoreError {
        match self {
            SyncFailure::Transport(e) => e.into(),
            SyncFailure::Store(e) => e,
        }
    }
}

enum RemoteApply {
    Inserted,
    Updated,
    Skipped,
    Conflict,
}

/// Replication driver for one store/zone pair
pub struct SyncManager {
    store: Arc<GraphStore>,
    transport: Arc<dyn SyncTransport>,
    zone: String,
    status: Mutex<SyncStatus>,
}

impl SyncManager {
    /// Wire a store to a transport zone. The store must be migrated.
    pub fn new(
        store: Arc<GraphStore>,
        transport: Arc<dyn SyncTransport>,
        zone: impl Into<String>,
    ) -> Result<Self> {
        if store.schema_version() == 0 {
            return Err(StoreError::NotInitialized);
        }
        Ok(Self {
            store,
            transport,
            zone: zone.into(),
            status: Mutex::new(SyncStatus::Idle),
        })
    }

    /// Where the state machine currently sits.
    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// Idempotent remote setup: create the zone, then subscribe. A failed
    /// subscription is non-fatal.
    pub async fn setup(&self) -> Result<()> {
        self.transport
            .ensure_zone(&self.zone)
            .await
            .map_err(StoreError::from)?;

        if let Err(e) = self.transport.subscribe(SUBSCRIPTION_ID).await {
            tracing::warn!(error = %e, "change subscription unavailable");
        }
        Ok(())
    }

    /// Run one full push/pull pass.
    ///
    /// Returns immediately with an empty report when a sync is already in
    /// flight. On failure the error lands in `sync_state` and, below
    /// [`MAX_SYNC_FAILURES`] consecutive failures, the pass re-runs after a
    /// `2^failures`-second backoff. Offline transports park the manager in
    /// [`SyncStatus::Offline`] without retrying.
    pub async fn sync(&self) -> Result<SyncReport> {
        {
            let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
            if *status == SyncStatus::Syncing {
                tracing::debug!("sync already running, ignoring re-entry");
                return Ok(SyncReport::default());
            }
            *status = SyncStatus::Syncing;
        }

        loop {
            match self.sync_once().await {
                Ok(report) => {
                    self.record_success().await?;
                    self.set_status(SyncStatus::Idle);
                    tracing::info!(
                        pushed = report.pushed,
                        pulled = report.pulled,
                        deleted = report.deleted,
                        conflicts = report.conflicts,
                        "sync completed"
                    );
                    return Ok(report);
                }
                Err(failure) => {
                    let offline = failure.is_offline();
                    let error = failure.into_store();
                    let failures = self
                        .record_failure(&error)
                        .await
                        .unwrap_or(MAX_SYNC_FAILURES);

                    if offline {
                        self.set_status(SyncStatus::Offline);
                        tracing::warn!(error = %error, "sync offline");
                        return Err(error);
                    }

                    self.set_status(SyncStatus::Error);
                    if failures >= MAX_SYNC_FAILURES {
                        tracing::warn!(failures, error = %error, "sync giving up");
                        return Err(error);
                    }

                    let backoff = Duration::from_secs(1u64 << failures);
                    tracing::warn!(
                        failures,
                        backoff_s = backoff.as_secs(),
                        error = %error,
                        "sync failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    self.set_status(SyncStatus::Syncing);
                }
            }
        }
    }

    async fn sync_once(&self) -> std::result::Result<SyncReport, SyncFailure> {
        let mut report = SyncReport::default();

        // ---- Push ----
        let (nodes, edges) = self
            .store
            .read(|conn| Ok((pending_nodes(conn)?, pending_edges(conn)?)))
            .await
            .map_err(SyncFailure::Store)?;

        let pending = (nodes.len() + edges.len()) as i64;
        if pending > 0 {
            self.store
                .write(|conn| {
                    conn.execute(
                        "UPDATE sync_state SET pending_changes = ?1 WHERE id = 'default'",
                        params![pending],
                    )?;
                    Ok(())
                })
                .await
                .map_err(SyncFailure::Store)?;

            let mut saves = Vec::with_capacity(nodes.len() + edges.len());
            for node in &nodes {
                saves.push(RemoteRecord::from_node(node).map_err(SyncFailure::Store)?);
            }
            for edge in &edges {
                saves.push(RemoteRecord::from_edge(edge).map_err(SyncFailure::Store)?);
            }

            let outcome = self
                .transport
                .modify_records(&self.zone, saves, Vec::new(), SavePolicy::ChangedKeys, false)
                .await
                .map_err(SyncFailure::Transport)?;

            let mut pushed_nodes = Vec::new();
            let mut pushed_edges = Vec::new();
            for result in &outcome.saved {
                if !result.succeeded() {
                    tracing::warn!(
                        record = %result.record_name,
                        error = ?result.error,
                        "remote rejected record"
                    );
                    continue;
                }
                if let Some(node) = nodes.iter().find(|n| n.id == result.record_name) {
                    // Stamp with the snapshot's modification time, not now:
                    // an edit landing mid-push stays pending.
                    pushed_nodes.push((node.id.clone(), node.modified_at));
                } else if let Some(edge) = edges.iter().find(|e| e.id == result.record_name) {
                    pushed_edges.push((edge.id.clone(), edge.sync_version));
                }
            }
            report.pushed = (pushed_nodes.len() + pushed_edges.len()) as u64;

            self.store
                .coordinator()
                .execute_in_transaction("sync.push", |scope| {
                    let mut stmt = scope
                        .conn()
                        .prepare("UPDATE nodes SET last_synced_at = ?2 WHERE id = ?1")?;
                    for (id, modified_at) in &pushed_nodes {
                        stmt.execute(params![id, codec::ts_to_sql(modified_at)])?;
                    }
                    mark_edges_synced(scope.conn(), &pushed_edges)?;
                    Ok(())
                })
                .await
                .map_err(SyncFailure::Store)?;
        }

        // ---- Pull ----
        let state = self.store.sync_state().await.map_err(SyncFailure::Store)?;
        let changes = self
            .transport
            .fetch_zone_changes(&self.zone, state.last_sync_token)
            .await
            .map_err(SyncFailure::Transport)?;

        let (pulled, deleted, conflicts) = self
            .apply_zone_changes(changes)
            .await
            .map_err(SyncFailure::Store)?;
        report.pulled = pulled;
        report.deleted = deleted;
        report.conflicts = conflicts;

        Ok(report)
    }

    /// Apply one page of remote changes, the deletions, and the new cursor
    /// in a single write scope.
    async fn apply_zone_changes(&self, changes: ZoneChanges) -> Result<(u64, u64, u64)> {
        self.store
            .coordinator()
            .execute_in_transaction("sync.pull", |scope| {
                let now = Utc::now();
                let mut pulled = 0u64;
                let mut deleted = 0u64;
                let mut conflicts = 0u64;

                for record in &changes.changed {
                    match record.record_type {
                        RecordType::Node => match apply_remote_node(scope.conn(), record, &now)? {
                            RemoteApply::Inserted => {
                                pulled += 1;
                                scope.record(
                                    "nodes",
                                    ChangeOp::Insert,
                                    Some(record.record_name.clone()),
                                );
                            }
                            RemoteApply::Updated => {
                                pulled += 1;
                                scope.record(
                                    "nodes",
                                    ChangeOp::Update,
                                    Some(record.record_name.clone()),
                                );
                            }
                            RemoteApply::Conflict => {
                                conflicts += 1;
                                tracing::warn!(
                                    record = %record.record_name,
                                    "equal-version divergence, caller must resolve"
                                );
                            }
                            RemoteApply::Skipped => {}
                        },
                        RecordType::Edge => {
                            if apply_remote_edge(scope.conn(), record)? {
                                pulled += 1;
                                scope.record(
                                    "edges",
                                    ChangeOp::Update,
                                    Some(record.record_name.clone()),
                                );
                            }
                        }
                    }
                }

                for id in &changes.deleted {
                    match id.record_type {
                        RecordType::Node => {
                            if apply_remote_node_deletion(scope.conn(), &id.record_name, &now)? {
                                deleted += 1;
                                scope.record(
                                    "nodes",
                                    ChangeOp::Update,
                                    Some(id.record_name.clone()),
                                );
                            }
                        }
                        RecordType::Edge => {
                            if apply_remote_edge_deletion(scope.conn(), &id.record_name)? {
                                deleted += 1;
                                scope.record(
                                    "edges",
                                    ChangeOp::Delete,
                                    Some(id.record_name.clone()),
                                );
                            }
                        }
                    }
                }

                if let Some(token) = &changes.new_token {
                    scope.conn().execute(
                        "UPDATE sync_state SET last_sync_token = ?1 WHERE id = 'default'",
                        params![token],
                    )?;
                }
                if conflicts > 0 {
                    scope.conn().execute(
                        "UPDATE sync_state SET conflict_count = conflict_count + ?1
                         WHERE id = 'default'",
                        params![conflicts as i64],
                    )?;
                }

                Ok((pulled, deleted, conflicts))
            })
            .await
    }

    /// Overwrite a batch of nodes and the sync cursor in one write scope.
    pub async fn atomic_sync_update(
        &self,
        nodes: &[Node],
        token: Option<Vec<u8>>,
    ) -> Result<()> {
        self.store
            .coordinator()
            .execute_in_transaction("sync.atomic_update", |scope| {
                let now = Utc::now();
                for node in nodes {
                    if crate::storage::get_node_any(scope.conn(), &node.id)?.is_some() {
                        overwrite_node(scope.conn(), node, &now)?;
                        scope.record("nodes", ChangeOp::Update, Some(node.id.clone()));
                    } else {
                        let mut incoming = node.clone();
                        incoming.last_synced_at = Some(now);
                        crate::storage::insert_node(scope.conn(), &incoming)?;
                        scope.record("nodes", ChangeOp::Insert, Some(node.id.clone()));
                    }
                }
                if let Some(token) = &token {
                    scope.conn().execute(
                        "UPDATE sync_state SET last_sync_token = ?1 WHERE id = 'default'",
                        params![token],
                    )?;
                }
                Ok(())
            })
            .await
    }

    // ========== Conflict resolution ==========

    /// Keep the local row: bump its version past the remote's, force-push
    /// it, and stamp it synced.
    pub async fn resolve_keep_local(&self, id: &str, remote_version: i64) -> Result<Node> {
        let correlation_id = format!("sync.resolve_local/{id}");
        let node = self
            .store
            .coordinator()
            .execute_in_transaction(&correlation_id, |scope| {
                let local = crate::storage::get_node_any(scope.conn(), id)?.ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "node",
                        id: id.to_string(),
                    }
                })?;
                let winning_version = local.version.max(remote_version) + 1;
                let now = codec::ts_to_sql(&Utc::now());
                scope.conn().execute(
                    "UPDATE nodes SET
                        version = ?2,
                        sync_version = sync_version + 1,
                        modified_at = ?3,
                        conflict_resolved_at = ?3
                    WHERE id = ?1",
                    params![id, winning_version, now],
                )?;
                scope.record("nodes", ChangeOp::Update, Some(id.to_string()));
                crate::storage::get_node_any(scope.conn(), id)?.ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "node",
                        id: id.to_string(),
                    }
                })
            })
            .await?;

        self.force_push(&node).await?;
        Ok(node)
    }

    /// Keep the remote record: overwrite the local row with it.
    pub async fn resolve_keep_remote(&self, record: &RemoteRecord) -> Result<Node> {
        let correlation_id = format!("sync.resolve_remote/{}", record.record_name);
        self.store
            .coordinator()
            .execute_in_transaction(&correlation_id, |scope| {
                let now = Utc::now();
                let mut incoming = record.to_node()?;
                incoming.conflict_resolved_at = Some(now);

                if crate::storage::get_node_any(scope.conn(), &incoming.id)?.is_some() {
                    overwrite_node(scope.conn(), &incoming, &now)?;
                } else {
                    incoming.last_synced_at = Some(now);
                    crate::storage::insert_node(scope.conn(), &incoming)?;
                }
                scope.record("nodes", ChangeOp::Update, Some(incoming.id.clone()));
                crate::storage::get_node_any(scope.conn(), &incoming.id)?.ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "node",
                        id: incoming.id.clone(),
                    }
                })
            })
            .await
    }

    /// Accept a caller-merged row with a version past both sides, then
    /// force-push it.
    pub async fn resolve_merge(&self, merged: &Node, remote_version: i64) -> Result<Node> {
        let correlation_id = format!("sync.resolve_merge/{}", merged.id);
        let node = self
            .store
            .coordinator()
            .execute_in_transaction(&correlation_id, |scope| {
                let local = crate::storage::get_node_any(scope.conn(), &merged.id)?.ok_or_else(
                    || StoreError::NotFound {
                        entity: "node",
                        id: merged.id.clone(),
                    },
                )?;

                let now = Utc::now();
                let mut resolved = merged.clone();
                resolved.version = local.version.max(remote_version) + 1;
                resolved.sync_version = local.sync_version + 1;
                resolved.modified_at = now;
                resolved.conflict_resolved_at = Some(now);

                overwrite_node(scope.conn(), &resolved, &now)?;
                scope.record("nodes", ChangeOp::Update, Some(resolved.id.clone()));
                crate::storage::get_node_any(scope.conn(), &resolved.id)?.ok_or_else(|| {
                    StoreError::NotFound {
                        entity: "node",
                        id: resolved.id.clone(),
                    }
                })
            })
            .await?;

        self.force_push(&node).await?;
        Ok(node)
    }

    async fn force_push(&self, node: &Node) -> Result<()> {
        let record = RemoteRecord::from_node(node)?;
        self.transport
            .modify_records(
                &self.zone,
                vec![record],
                Vec::new(),
                SavePolicy::ChangedKeys,
                false,
            )
            .await
            .map_err(StoreError::from)?;
        self.mark_synced(std::slice::from_ref(&node.id)).await?;
        Ok(())
    }

    // ========== Sync-safe transactions ==========

    /// Capture the current `sync_version` of each node before a sync-safe
    /// write, for [`SyncManager::rollback_sync_versions`] on remote failure.
    pub async fn begin_sync_batch(&self, ids: &[String]) -> Result<SyncVersionBatch> {
        let ids = ids.to_vec();
        self.store
            .read(move |conn| {
                let mut versions = HashMap::new();
                let mut stmt = conn.prepare("SELECT sync_version FROM nodes WHERE id = ?1")?;
                for id in &ids {
                    let version: Option<i64> = stmt
                        .query_row([id.as_str()], |row| row.get(0))
                        .optional()?;
                    if let Some(version) = version {
                        versions.insert(id.clone(), version);
                    }
                }
                Ok(SyncVersionBatch { versions })
            })
            .await
    }

    /// Restore the captured `sync_version`s after a failed remote write.
    pub async fn rollback_sync_versions(&self, batch: &SyncVersionBatch) -> Result<u64> {
        self.store
            .coordinator()
            .execute_in_transaction("sync.rollback_versions", |scope| {
                let mut restored = 0u64;
                let mut stmt = scope
                    .conn()
                    .prepare("UPDATE nodes SET sync_version = ?2 WHERE id = ?1")?;
                for (id, version) in &batch.versions {
                    restored += stmt.execute(params![id, version])? as u64;
                }
                Ok(restored)
            })
            .await
    }

    /// Stamp nodes as synced now.
    pub async fn mark_synced(&self, ids: &[String]) -> Result<u64> {
        let synced_at = Utc::now();
        self.store
            .coordinator()
            .execute_in_transaction("sync.mark_synced", |scope| {
                mark_nodes_synced(scope.conn(), ids, &synced_at)
            })
            .await
    }

    // ========== Bookkeeping ==========

    async fn record_success(&self) -> Result<()> {
        let now = codec::ts_to_sql(&Utc::now());
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE sync_state SET
                        consecutive_failures = 0,
                        last_error = NULL,
                        last_error_at = NULL,
                        last_sync_at = ?1,
                        pending_changes = 0
                    WHERE id = 'default'",
                    params![now],
                )?;
                Ok(())
            })
            .await
    }

    async fn record_failure(&self, error: &StoreError) -> Result<i64> {
        let message = error.to_string();
        let now = codec::ts_to_sql(&Utc::now());
        self.store
            .write(move |conn| {
                conn.execute(
                    "UPDATE sync_state SET
                        consecutive_failures = consecutive_failures + 1,
                        last_error = ?1,
                        last_error_at = ?2
                    WHERE id = 'default'",
                    params![message, now],
                )?;
                conn.query_row(
                    "SELECT consecutive_failures FROM sync_state WHERE id = 'default'",
                    [],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)
            })
            .await
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("zone", &self.zone)
            .field("status", &self.status())
            .finish()
    }
}

// ========== Row-level helpers ==========

/// Locally modified nodes, soft-deleted included so deletions replicate,
/// oldest modification first.
fn pending_nodes(conn: &Connection) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM nodes
         WHERE last_synced_at IS NULL OR modified_at > last_synced_at
         ORDER BY modified_at ASC",
    )?;
    let rows = stmt.query_map([], codec::node_from_row)?;

    let mut nodes = Vec::new();
    for node in rows {
        nodes.push(node?);
    }
    Ok(nodes)
}

/// Edges whose change counter moved past the last pushed value.
fn pending_edges(conn: &Connection) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM edges WHERE sync_version > last_synced_version ORDER BY id",
    )?;
    let rows = stmt.query_map([], codec::edge_from_row)?;

    let mut edges = Vec::new();
    for edge in rows {
        edges.push(edge?);
    }
    Ok(edges)
}

fn mark_nodes_synced(conn: &Connection, ids: &[String], at: &DateTime<Utc>) -> Result<u64> {
    let stamp = codec::ts_to_sql(at);
    let mut stmt = conn.prepare("UPDATE nodes SET last_synced_at = ?2 WHERE id = ?1")?;
    let mut stamped = 0u64;
    for id in ids {
        stamped += stmt.execute(params![id, stamp])? as u64;
    }
    Ok(stamped)
}

fn mark_edges_synced(conn: &Connection, pushed: &[(String, i64)]) -> Result<u64> {
    let mut stmt =
        conn.prepare("UPDATE edges SET last_synced_version = ?2 WHERE id = ?1")?;
    let mut stamped = 0u64;
    for (id, version) in pushed {
        stamped += stmt.execute(params![id, version])? as u64;
    }
    Ok(stamped)
}

/// Version-gated upsert of a remote node record.
fn apply_remote_node(
    conn: &Connection,
    record: &RemoteRecord,
    now: &DateTime<Utc>,
) -> Result<RemoteApply> {
    let incoming = record.to_node()?;

    match crate::storage::get_node_any(conn, &incoming.id)? {
        None => {
            let mut node = incoming;
            node.last_synced_at = Some(*now);
            crate::storage::insert_node(conn, &node)?;
            Ok(RemoteApply::Inserted)
        }
        Some(local) => {
            if incoming.version > local.version {
                overwrite_node(conn, &incoming, now)?;
                Ok(RemoteApply::Updated)
            } else if incoming.version == local.version && content_differs(&local, &incoming) {
                Ok(RemoteApply::Conflict)
            } else {
                Ok(RemoteApply::Skipped)
            }
        }
    }
}

/// Write every replicated column of a node, stamping `last_synced_at`.
fn overwrite_node(conn: &Connection, node: &Node, synced_at: &DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE nodes SET
            node_type = ?2, name = ?3, content = ?4, summary = ?5,
            latitude = ?6, longitude = ?7, location_name = ?8, location_address = ?9,
            created_at = ?10, modified_at = ?11, due_at = ?12, completed_at = ?13,
            event_start = ?14, event_end = ?15,
            folder = ?16, tags = ?17, status = ?18,
            priority = ?19, importance = ?20, sort_order = ?21,
            source = ?22, source_id = ?23, source_url = ?24,
            deleted_at = ?25, version = ?26, sync_version = ?27,
            last_synced_at = ?28, conflict_resolved_at = ?29
        WHERE id = ?1",
        params![
            node.id,
            node.node_type,
            node.name,
            node.content,
            node.summary,
            node.latitude,
            node.longitude,
            node.location_name,
            node.location_address,
            codec::ts_to_sql(&node.created_at),
            codec::ts_to_sql(&node.modified_at),
            codec::opt_ts_to_sql(&node.due_at),
            codec::opt_ts_to_sql(&node.completed_at),
            codec::opt_ts_to_sql(&node.event_start),
            codec::opt_ts_to_sql(&node.event_end),
            node.folder,
            codec::tags_to_sql(&node.tags),
            node.status,
            node.priority,
            node.importance,
            node.sort_order,
            node.source,
            node.source_id,
            node.source_url,
            codec::opt_ts_to_sql(&node.deleted_at),
            node.version,
            node.sync_version,
            codec::ts_to_sql(synced_at),
            codec::opt_ts_to_sql(&node.conflict_resolved_at),
        ],
    )?;
    Ok(())
}

/// True when two rows at the same version carry different user-visible
/// state. Sync bookkeeping and modification stamps are ignored.
fn content_differs(local: &Node, incoming: &Node) -> bool {
    fn normalized(node: &Node) -> Node {
        let mut node = node.clone();
        node.modified_at = node.created_at;
        node.sync_version = 0;
        node.last_synced_at = None;
        node.conflict_resolved_at = None;
        node
    }
    normalized(local) != normalized(incoming)
}

/// Ungated upsert of a remote edge record. Constraint failures (an
/// endpoint not replicated yet, or a colliding triple) skip the record.
fn apply_remote_edge(conn: &Connection, record: &RemoteRecord) -> Result<bool> {
    let edge = record.to_edge()?;

    let applied = conn.execute(
        "INSERT INTO edges (
            id, edge_type, source_id, target_id,
            label, weight, directed, sequence_order,
            channel, timestamp, subject,
            sync_version, last_synced_version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
        ON CONFLICT(id) DO UPDATE SET
            edge_type = excluded.edge_type,
            source_id = excluded.source_id,
            target_id = excluded.target_id,
            label = excluded.label,
            weight = excluded.weight,
            directed = excluded.directed,
            sequence_order = excluded.sequence_order,
            channel = excluded.channel,
            timestamp = excluded.timestamp,
            subject = excluded.subject,
            sync_version = excluded.sync_version,
            last_synced_version = excluded.sync_version",
        params![
            edge.id,
            edge.edge_type.as_str(),
            edge.source_id,
            edge.target_id,
            edge.label,
            edge.weight,
            edge.directed,
            edge.sequence_order,
            edge.channel,
            codec::opt_ts_to_sql(&edge.timestamp),
            edge.subject,
            edge.sync_version,
        ],
    );

    match applied {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, message))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            tracing::warn!(
                edge = %edge.id,
                error = message.as_deref().unwrap_or("constraint violation"),
                "skipping unappliable remote edge"
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn apply_remote_node_deletion(
    conn: &Connection,
    id: &str,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let stamp = codec::ts_to_sql(now);
    let changed = conn.execute(
        "UPDATE nodes SET deleted_at = ?2, last_synced_at = ?2
         WHERE id = ?1 AND deleted_at IS NULL",
        params![id, stamp],
    )?;
    Ok(changed > 0)
}

fn apply_remote_edge_deletion(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM edges WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
