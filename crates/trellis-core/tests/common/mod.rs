//! Shared test harness: an in-memory sync transport that several replicas
//! can point at, modeled as a record map plus an append-only change log.
//! Tokens are little-endian indexes into the log.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use trellis_core::{
    ModifyOutcome, RecordId, RecordOutcome, RemoteRecord, SavePolicy, SyncTransport,
    TransportResult, ZoneChanges,
};

enum ZoneEvent {
    Changed(RemoteRecord),
    Deleted(RecordId),
}

#[derive(Default)]
struct ZoneState {
    records: HashMap<RecordId, RemoteRecord>,
    log: Vec<ZoneEvent>,
}

#[derive(Default)]
pub struct MemoryTransport {
    zone: Mutex<ZoneState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.zone.lock().unwrap().records.len()
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn ensure_zone(&self, _zone: &str) -> TransportResult<()> {
        Ok(())
    }

    async fn subscribe(&self, _subscription_id: &str) -> TransportResult<()> {
        Ok(())
    }

    async fn modify_records(
        &self,
        _zone: &str,
        saves: Vec<RemoteRecord>,
        deletes: Vec<RecordId>,
        _policy: SavePolicy,
        _atomic: bool,
    ) -> TransportResult<ModifyOutcome> {
        let mut outcome = ModifyOutcome::default();
        let mut zone = self.zone.lock().unwrap();
        for record in saves {
            outcome.saved.push(RecordOutcome::ok(&record.record_name));
            zone.records.insert(record.id(), record.clone());
            zone.log.push(ZoneEvent::Changed(record));
        }
        for id in deletes {
            outcome.deleted.push(RecordOutcome::ok(&id.record_name));
            zone.records.remove(&id);
            zone.log.push(ZoneEvent::Deleted(id));
        }
        Ok(outcome)
    }

    async fn fetch_zone_changes(
        &self,
        _zone: &str,
        token: Option<Vec<u8>>,
    ) -> TransportResult<ZoneChanges> {
        let start = token
            .and_then(|t| t.try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0) as usize;

        let zone = self.zone.lock().unwrap();
        let mut changes = ZoneChanges::default();
        for event in zone.log.iter().skip(start) {
            match event {
                ZoneEvent::Changed(record) => changes.changed.push(record.clone()),
                ZoneEvent::Deleted(id) => changes.deleted.push(id.clone()),
            }
        }
        changes.new_token = Some((zone.log.len() as u64).to_le_bytes().to_vec());
        Ok(changes)
    }
}
