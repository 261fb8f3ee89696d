//! Per-key version history
//!
//! A chain holds the committed entries of one key in strictly ascending
//! version order. Entries are never modified; they are appended at commit
//! and dropped only by garbage collection.

use super::{ReadView, Version};
use crate::content::ContentAddress;

/// Bytes of index metadata charged per entry: version (8), tag (1),
/// content address (32).
pub const ENTRY_METADATA_BYTES: u64 = 8 + 1 + 32;

/// What a key was bound to at some version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionedValue {
    Value(ContentAddress),
    Tombstone,
}

impl VersionedValue {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, VersionedValue::Tombstone)
    }

    pub fn address(&self) -> Option<ContentAddress> {
        match self {
            VersionedValue::Value(address) => Some(*address),
            VersionedValue::Tombstone => None,
        }
    }
}

/// One committed entry of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub version: Version,
    pub value: VersionedValue,
}

impl IndexEntry {
    pub fn value(version: Version, address: ContentAddress) -> Self {
        Self {
            version,
            value: VersionedValue::Value(address),
        }
    }

    pub fn tombstone(version: Version) -> Self {
        Self {
            version,
            value: VersionedValue::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }
}

/// The complete retained history of a single key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionChain {
    entries: Vec<IndexEntry>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain from entries; returns None unless versions strictly
    /// ascend.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Option<Self> {
        if entries.windows(2).all(|w| w[0].version < w[1].version) {
            Some(Self { entries })
        } else {
            None
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries, oldest first. No visibility filtering.
    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Newest committed entry
    pub fn latest(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }

    /// Appends an entry; it must be newer than every entry in the chain.
    pub fn push(&mut self, entry: IndexEntry) {
        debug_assert!(
            self.latest().map_or(true, |last| last.version < entry.version),
            "version chain entries must strictly ascend"
        );
        self.entries.push(entry);
    }

    /// Entry with the highest version visible to `view`, tombstones included.
    pub fn visible(&self, view: ReadView) -> Option<&IndexEntry> {
        let idx = self
            .entries
            .partition_point(|e| view.can_see(e.version));
        if idx == 0 {
            None
        } else {
            Some(&self.entries[idx - 1])
        }
    }

    /// Drops entries no reader at or above `floor` can observe: every entry
    /// older than the newest one at or below `floor`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, floor: Version) -> usize {
        let at_or_below = self.entries.partition_point(|e| e.version <= floor);
        if at_or_below <= 1 {
            return 0;
        }
        let removed = at_or_below - 1;
        self.entries.drain(..removed);
        removed
    }

    /// Returns true when the only retained entry is a tombstone at or below
    /// `floor`, so the key is absent for every possible reader.
    pub fn is_dead(&self, floor: Version) -> bool {
        match self.entries.as_slice() {
            [only] => only.is_tombstone() && only.version <= floor,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: &str) -> ContentAddress {
        ContentAddress::of(tag.as_bytes())
    }

    fn chain(entries: &[(u64, Option<&str>)]) -> VersionChain {
        let mut chain = VersionChain::new();
        for (v, value) in entries {
            let version = Version::new(*v);
            chain.push(match value {
                Some(tag) => IndexEntry::value(version, addr(tag)),
                None => IndexEntry::tombstone(version),
            });
        }
        chain
    }

    #[test]
    fn test_empty_chain_has_no_visible_entry() {
        let chain = VersionChain::new();
        assert!(chain.visible(ReadView::latest()).is_none());
        assert!(chain.latest().is_none());
    }

    #[test]
    fn test_from_entries_rejects_unordered() {
        let entries = vec![
            IndexEntry::value(Version::new(2), addr("a")),
            IndexEntry::value(Version::new(1), addr("b")),
        ];
        assert!(VersionChain::from_entries(entries).is_none());
    }

    #[test]
    fn test_prune_keeps_newest_at_or_below_floor() {
        let mut c = chain(&[(10, Some("a")), (20, Some("b")), (30, Some("c")), (40, Some("d"))]);
        assert_eq!(c.prune(Version::new(35)), 2);
        let versions: Vec<u64> = c.entries().iter().map(|e| e.version.value()).collect();
        assert_eq!(versions, vec![30, 40]);
    }

    #[test]
    fn test_prune_below_first_entry_is_noop() {
        let mut c = chain(&[(10, Some("a")), (20, Some("b"))]);
        assert_eq!(c.prune(Version::new(5)), 0);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_prune_preserves_visibility_above_floor() {
        let mut c = chain(&[(10, Some("a")), (20, None), (30, Some("c"))]);
        let before = *c.visible(ReadView::new(Version::new(25))).unwrap();
        c.prune(Version::new(25));
        assert_eq!(*c.visible(ReadView::new(Version::new(25))).unwrap(), before);
    }

    #[test]
    fn test_dead_chain_requires_tombstone_at_floor() {
        let mut c = chain(&[(10, Some("a")), (20, None)]);
        c.prune(Version::new(20));
        assert!(c.is_dead(Version::new(20)));
        assert!(!c.is_dead(Version::new(19)));

        let live = chain(&[(10, Some("a"))]);
        assert!(!live.is_dead(Version::new(100)));
    }
}
