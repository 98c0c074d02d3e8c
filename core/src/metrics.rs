use std::array;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::classify::Verdict;
use crate::record::Resolution;

/// Ingestion-side counters. Everything is relaxed atomics; snapshots are
/// advisory.
#[derive(Debug)]
pub struct ObserverMetrics {
    datagrams_total: AtomicU64,
    confirmations_total: AtomicU64,
    initiations_total: AtomicU64,
    ignored_total: AtomicU64,
    resolved_total: [AtomicU64; Resolution::ALL.len()],
}

impl Default for ObserverMetrics {
    fn default() -> Self {
        Self {
            datagrams_total: AtomicU64::new(0),
            confirmations_total: AtomicU64::new(0),
            initiations_total: AtomicU64::new(0),
            ignored_total: AtomicU64::new(0),
            resolved_total: array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl ObserverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_datagram(&self) {
        self.datagrams_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verdict(&self, verdict: &Verdict) {
        let counter = match verdict {
            Verdict::Confirmation(_) => &self.confirmations_total,
            Verdict::Initiation { .. } => &self.initiations_total,
            Verdict::Ignore => &self.ignored_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution(&self, resolution: Resolution) {
        self.resolved_total[resolution.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagrams_total(&self) -> u64 {
        self.datagrams_total.load(Ordering::Relaxed)
    }

    pub fn resolved(&self, resolution: Resolution) -> u64 {
        self.resolved_total[resolution.index()].load(Ordering::Relaxed)
    }

    pub fn resolved_snapshot(&self) -> Vec<(&'static str, u64)> {
        Resolution::ALL
            .iter()
            .enumerate()
            .map(|(idx, kind)| (kind.as_str(), self.resolved_total[idx].load(Ordering::Relaxed)))
            .collect()
    }
}
