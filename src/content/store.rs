//! In-memory content store
//!
//! Immutable blobs keyed by content address. A blob is written once and
//! never modified; storing equal bytes again is a no-op. Blob bytes reach
//! disk inline in WAL put records and in checkpoint snapshots, and the store
//! is rebuilt from them on startup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::ContentAddress;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content not found: {0}")]
    NotFound(ContentAddress),

    #[error("content digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch {
        expected: ContentAddress,
        actual: ContentAddress,
    },
}

pub type ContentResult<T> = Result<T, ContentError>;

#[derive(Debug, Default)]
struct Blobs {
    by_address: HashMap<ContentAddress, Arc<[u8]>>,
    bytes: u64,
}

/// Deduplicating blob store.
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: RwLock<Blobs>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` if absent and returns its address.
    pub fn put(&self, bytes: &[u8]) -> ContentAddress {
        let address = ContentAddress::of(bytes);
        self.insert(address, bytes);
        address
    }

    /// Stores a blob read back from durable state after checking its digest.
    pub fn insert_verified(&self, address: ContentAddress, bytes: &[u8]) -> ContentResult<()> {
        let actual = ContentAddress::of(bytes);
        if actual != address {
            return Err(ContentError::DigestMismatch {
                expected: address,
                actual,
            });
        }
        self.insert(address, bytes);
        Ok(())
    }

    fn insert(&self, address: ContentAddress, bytes: &[u8]) {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        if blobs.by_address.contains_key(&address) {
            return;
        }
        blobs.bytes += bytes.len() as u64;
        blobs.by_address.insert(address, Arc::from(bytes));
    }

    /// Returns the blob stored under `address`.
    pub fn get(&self, address: &ContentAddress) -> ContentResult<Arc<[u8]>> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_address
            .get(address)
            .cloned()
            .ok_or(ContentError::NotFound(*address))
    }

    pub fn contains(&self, address: &ContentAddress) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_address
            .contains_key(address)
    }

    /// Number of unique blobs
    pub fn len(&self) -> usize {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_address
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the lengths of unique blobs
    pub fn size_bytes(&self) -> u64 {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes
    }

    /// Drops every blob not in `live`; returns the number dropped.
    pub fn retain(&self, live: &HashSet<ContentAddress>) -> usize {
        let mut blobs = self.blobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = blobs.by_address.len();
        let mut freed = 0u64;
        blobs.by_address.retain(|address, bytes| {
            let keep = live.contains(address);
            if !keep {
                freed += bytes.len() as u64;
            }
            keep
        });
        blobs.bytes -= freed;
        before - blobs.by_address.len()
    }

    /// Every blob, in address order
    pub fn blobs(&self) -> Vec<(ContentAddress, Arc<[u8]>)> {
        let blobs = self.blobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = blobs
            .by_address
            .iter()
            .map(|(a, b)| (*a, Arc::clone(b)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
