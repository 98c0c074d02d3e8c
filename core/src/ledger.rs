use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use parking_lot::Mutex;

use crate::key::FlowKey;
use crate::record::{PendingRecord, Resolution, ResolvedRecord};

/// Concurrency-safe store of pending, unresolved flows.
///
/// All map mutation for a key goes through that key's shard lock, which is
/// what guarantees exactly one resolution per flow even when a confirmation
/// and an expiry sweep race: whichever removes the record emits it, the
/// loser finds the key absent. A shard count of one degenerates to the
/// single-lock scheme; higher counts spread hot ingestion across locks.
/// The sweep takes each shard lock only for the duration of its pass over
/// that shard.
#[derive(Debug)]
pub struct FlowLedger {
    shards: Box<[Mutex<HashMap<FlowKey, PendingRecord>>]>,
}

pub const DEFAULT_SHARDS: usize = 16;

impl Default for FlowLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

impl FlowLedger {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self { shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn shard(&self, key: &FlowKey) -> &Mutex<HashMap<FlowKey, PendingRecord>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Accept an initiation event. A key with no record becomes pending; a
    /// key already pending has its server name and first-seen timestamp
    /// replaced in place (retransmitted initiations on the same 4-tuple),
    /// without touching the resolution state or growing the ledger.
    /// Returns true when the record is new.
    pub fn record_initiation(&self, key: FlowKey, server_name: String, ts_micros: u64) -> bool {
        let mut shard = self.shard(&key).lock();
        match shard.get_mut(&key) {
            Some(existing) => {
                existing.server_name = server_name;
                existing.first_seen_micros = ts_micros;
                false
            }
            None => {
                shard.insert(key, PendingRecord::new(key, server_name, ts_micros));
                true
            }
        }
    }

    /// Accept a confirmation event. Removes the pending record, if any, and
    /// returns it resolved with censored=false. At most one caller can win
    /// per key; a confirmation for an unknown key is common (every filler
    /// datagram after the first confirmation lands here) and returns None.
    pub fn resolve_confirmed(&self, key: &FlowKey) -> Option<ResolvedRecord> {
        let record = self.shard(key).lock().remove(key)?;
        Some(record.resolve(Resolution::Confirmed))
    }

    /// One expiry pass: remove and return every record whose first-seen
    /// timestamp is more than `timeout` behind `now_micros`.
    pub fn sweep_expired(&self, now_micros: u64, timeout: Duration) -> Vec<ResolvedRecord> {
        let timeout_micros = timeout.as_micros() as u64;
        let mut expired = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let overdue: Vec<FlowKey> = shard
                .values()
                .filter(|record| now_micros.saturating_sub(record.first_seen_micros) > timeout_micros)
                .map(|record| record.key)
                .collect();
            for key in overdue {
                if let Some(record) = shard.remove(&key) {
                    expired.push(record.resolve(Resolution::Expired));
                }
            }
        }
        expired
    }

    /// Shutdown flush: drain every remaining record, resolved with the
    /// censored flag it currently holds.
    pub fn drain_all(&self) -> Vec<ResolvedRecord> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            for (_, record) in shard.drain() {
                drained.push(record.resolve(Resolution::Flushed));
            }
        }
        drained
    }

    /// Number of distinct unresolved flow keys currently tracked.
    pub fn pending_len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }
}
