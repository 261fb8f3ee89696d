//! Engine statistics

use serde::Serialize;

use crate::mvcc::Version;
use crate::observability::MetricsSnapshot;

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Keys whose newest version is a value
    pub key_count: u64,
    /// Content bytes plus index metadata bytes
    pub approx_size_bytes: u64,
    pub current_version: Version,
    /// Unique blobs in the content store
    pub content_blobs: u64,
    /// Bytes of unique blobs
    pub content_bytes: u64,
    /// Retained version entries across all keys
    pub index_entries: u64,
    pub index_depth: u64,
    pub wal_bytes: u64,
    pub active_transactions: u64,
    pub metrics: MetricsSnapshot,
}
