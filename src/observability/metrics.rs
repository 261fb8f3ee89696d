//! Metrics registry
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; values are exact once writers quiesce

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one engine instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    commits: AtomicU64,
    aborts: AtomicU64,
    conflicts: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    wal_records: AtomicU64,
    wal_bytes: AtomicU64,
    wal_fsyncs: AtomicU64,
    checkpoints: AtomicU64,
    gc_runs: AtomicU64,
    gc_pruned_versions: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_aborts(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reads(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_writes(&self, count: u64) {
        self.writes.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one WAL append of `records` records totalling `bytes`
    pub fn record_wal_append(&self, records: u64, bytes: u64) {
        self.wal_records.fetch_add(records, Ordering::Relaxed);
        self.wal_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_wal_fsyncs(&self) {
        self.wal_fsyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gc(&self, pruned_versions: u64) {
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.gc_pruned_versions
            .fetch_add(pruned_versions, Ordering::Relaxed);
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            wal_records: self.wal_records.load(Ordering::Relaxed),
            wal_bytes: self.wal_bytes.load(Ordering::Relaxed),
            wal_fsyncs: self.wal_fsyncs.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            gc_runs: self.gc_runs.load(Ordering::Relaxed),
            gc_pruned_versions: self.gc_pruned_versions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub aborts: u64,
    pub conflicts: u64,
    pub reads: u64,
    pub writes: u64,
    pub wal_records: u64,
    pub wal_bytes: u64,
    pub wal_fsyncs: u64,
    pub checkpoints: u64,
    pub gc_runs: u64,
    pub gc_pruned_versions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment_commits();
        metrics.increment_commits();
        metrics.record_wal_append(3, 120);
        metrics.record_gc(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commits, 2);
        assert_eq!(snapshot.wal_records, 3);
        assert_eq!(snapshot.wal_bytes, 120);
        assert_eq!(snapshot.gc_runs, 1);
        assert_eq!(snapshot.gc_pruned_versions, 4);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(MetricsRegistry::new().snapshot()).unwrap();
        assert_eq!(json["commits"], 0);
    }
}
