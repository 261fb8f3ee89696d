//! Snapshot registry and version garbage collection
//!
//! A version entry may be dropped only if no possible reader can observe
//! it. The visibility floor is the oldest read view of any active
//! transaction, or the current version when none is active. For each chain
//! GC keeps every entry above the floor plus the newest entry at or below
//! it; a key whose only remaining entry is a tombstone at or below the floor
//! is removed entirely.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use super::{ReadView, Version};

/// Multiset of read views held by active transactions.
#[derive(Debug, Default)]
pub struct ActiveSnapshots {
    views: Mutex<BTreeMap<Version, usize>>,
}

impl ActiveSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a view whose bound is read by `current` while the registry
    /// is locked, so a concurrent floor computation sees either the
    /// registration or a bound no older than its own floor.
    pub fn register_with(&self, current: impl FnOnce() -> Version) -> ReadView {
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let bound = current();
        *views.entry(bound).or_insert(0) += 1;
        ReadView::new(bound)
    }

    pub fn unregister(&self, view: ReadView) {
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let bound = view.upper_bound();
        if let Some(count) = views.get_mut(&bound) {
            *count -= 1;
            if *count == 0 {
                views.remove(&bound);
            }
        }
    }

    /// Number of registered views
    pub fn len(&self) -> usize {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest registered bound
    pub fn oldest(&self) -> Option<Version> {
        self.views
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .next()
            .copied()
    }

    /// Version below which no reader can look
    pub fn visibility_floor(&self, current: Version) -> Version {
        self.oldest().map_or(current, |oldest| oldest.min(current))
    }
}

/// Outcome of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub floor: Version,
    pub pruned_versions: u64,
    pub removed_keys: u64,
}
