//! Publish outcome counters.
//!
//! The publisher reports through [`PublishObserver`]; [`PublishMetrics`] is
//! the atomic-counter implementation. Hand each publisher its own instance
//! (or share one process-wide) via `Arc`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Sink for publish outcomes.
///
/// `sending` and `sent` bracket the bulk exchange and move the active
/// gauge; the terminal calls (`acked`, `failed`, `dropped`, `duplicates`,
/// `dead_letter`) only count.
pub trait PublishObserver: Send + Sync {
    /// `n` events entered a publish call.
    fn new_batch(&self, n: usize);
    /// `n` encoded events are about to go on the wire.
    fn sending(&self, n: usize);
    /// The exchange for `n` events finished, successfully or not.
    fn sent(&self, n: usize);
    fn acked(&self, n: usize);
    /// Events handed back for retry.
    fn failed(&self, n: usize);
    /// Events permanently given up on.
    fn dropped(&self, n: usize);
    fn duplicates(&self, n: usize);
    /// Events written to the dead-letter index.
    fn dead_letter(&self, n: usize);
    /// Retried events that were rejected for capacity; a subset of `failed`.
    fn too_many(&self, n: usize);
    fn batch_split(&self);
    /// Uncompressed bytes written and the time the exchange took.
    fn report_write(&self, bytes: usize, latency: Duration);
}

/// Atomic counters for publish outcomes.
#[derive(Debug, Default)]
pub struct PublishMetrics {
    pub events_total: AtomicU64,
    pub events_active: AtomicI64,
    pub events_acked: AtomicU64,
    pub events_failed: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_duplicates: AtomicU64,
    pub events_dead_letter: AtomicU64,
    pub events_too_many: AtomicU64,
    pub batches: AtomicU64,
    pub batches_split: AtomicU64,
    pub write_bytes: AtomicU64,
    pub write_latency_ms: AtomicU64,
}

impl PublishMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all counts as a snapshot.
    pub fn snapshot(&self) -> PublishMetricsSnapshot {
        PublishMetricsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            events_active: self.events_active.load(Ordering::Relaxed),
            events_acked: self.events_acked.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_duplicates: self.events_duplicates.load(Ordering::Relaxed),
            events_dead_letter: self.events_dead_letter.load(Ordering::Relaxed),
            events_too_many: self.events_too_many.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batches_split: self.batches_split.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            write_latency_ms: self.write_latency_ms.load(Ordering::Relaxed),
        }
    }

    fn count(counter: &AtomicU64, n: usize) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

impl PublishObserver for PublishMetrics {
    fn new_batch(&self, n: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.events_total.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn sending(&self, n: usize) {
        self.events_active.fetch_add(n as i64, Ordering::Relaxed);
    }

    fn sent(&self, n: usize) {
        self.events_active.fetch_sub(n as i64, Ordering::Relaxed);
    }

    fn acked(&self, n: usize) {
        Self::count(&self.events_acked, n);
    }

    fn failed(&self, n: usize) {
        Self::count(&self.events_failed, n);
    }

    fn dropped(&self, n: usize) {
        Self::count(&self.events_dropped, n);
    }

    fn duplicates(&self, n: usize) {
        Self::count(&self.events_duplicates, n);
    }

    fn dead_letter(&self, n: usize) {
        Self::count(&self.events_dead_letter, n);
    }

    fn too_many(&self, n: usize) {
        Self::count(&self.events_too_many, n);
    }

    fn batch_split(&self) {
        self.batches_split.fetch_add(1, Ordering::Relaxed);
    }

    fn report_write(&self, bytes: usize, latency: Duration) {
        self.write_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Snapshot of publish metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishMetricsSnapshot {
    pub events_total: u64,
    pub events_active: i64,
    pub events_acked: u64,
    pub events_failed: u64,
    pub events_dropped: u64,
    pub events_duplicates: u64,
    pub events_dead_letter: u64,
    pub events_too_many: u64,
    pub batches: u64,
    pub batches_split: u64,
    pub write_bytes: u64,
    pub write_latency_ms: u64,
}

impl PublishMetricsSnapshot {
    /// Counters by their exported name.
    pub fn counters(&self) -> Vec<(&'static str, i64)> {
        vec![
            ("events.total", self.events_total as i64),
            ("events.active", self.events_active),
            ("events.acked", self.events_acked as i64),
            ("events.failed", self.events_failed as i64),
            ("events.dropped", self.events_dropped as i64),
            ("events.duplicates", self.events_duplicates as i64),
            ("events.dead_letter", self.events_dead_letter as i64),
            ("events.toomany", self.events_too_many as i64),
            ("batches", self.batches as i64),
            ("batches.split", self.batches_split as i64),
            ("write.bytes", self.write_bytes as i64),
            ("write.latency_ms", self.write_latency_ms as i64),
        ]
    }

    /// Look up one counter by exported name.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.counters()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Events that reached a terminal outcome.
    pub fn total_terminal(&self) -> u64 {
        self.events_acked
            + self.events_failed
            + self.events_dropped
            + self.events_duplicates
            + self.events_dead_letter
    }
}
