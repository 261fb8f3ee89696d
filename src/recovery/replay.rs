//! Applying replayed commits
//!
//! Each complete commit from the WAL is applied atomically: its values are
//! verified against their content addresses, then all of its index entries
//! are published as one root at the commit's version.

use crate::content::ContentStore;
use crate::error::Result;
use crate::index::IndexTree;
use crate::mvcc::VersionedValue;
use crate::wal::{ReplayedCommit, WalOperation};

/// Destination of replayed commits
pub trait ReplayTarget {
    fn apply_commit(&mut self, commit: &ReplayedCommit) -> Result<()>;
}

/// Replays into the live index and content store
pub struct StateReplayer<'a> {
    index: &'a IndexTree,
    content: &'a ContentStore,
}

impl<'a> StateReplayer<'a> {
    pub fn new(index: &'a IndexTree, content: &'a ContentStore) -> Self {
        Self { index, content }
    }
}

impl ReplayTarget for StateReplayer<'_> {
    fn apply_commit(&mut self, commit: &ReplayedCommit) -> Result<()> {
        let mut entries = Vec::with_capacity(commit.writes.len());
        for op in &commit.writes {
            match op {
                WalOperation::Put {
                    key,
                    address,
                    value,
                } => {
                    self.content.insert_verified(*address, value)?;
                    entries.push((key.as_slice(), VersionedValue::Value(*address)));
                }
                WalOperation::Delete { key } => {
                    entries.push((key.as_slice(), VersionedValue::Tombstone));
                }
                WalOperation::Commit { .. } => {}
            }
        }
        self.index.apply(commit.version, entries);
        Ok(())
    }
}

/// Statistics from WAL replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Commits newer than the checkpoint, applied
    pub replayed: u64,
    /// Commits already contained in the checkpoint
    pub skipped: u64,
    pub puts: u64,
    pub deletes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentAddress;
    use crate::error::ErrorKind;
    use crate::mvcc::{ReadView, Version};

    fn put(key: &str, value: &str) -> WalOperation {
        WalOperation::Put {
            key: key.as_bytes().to_vec(),
            address: ContentAddress::of(value.as_bytes()),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_commit_applies_all_writes_at_its_version() {
        let index = IndexTree::new();
        let content = ContentStore::new();
        let mut replayer = StateReplayer::new(&index, &content);

        replayer
            .apply_commit(&ReplayedCommit {
                version: Version::new(5),
                writes: vec![put("a", "1"), put("b", "2")],
            })
            .unwrap();

        assert_eq!(index.latest_version(b"a"), Some(Version::new(5)));
        assert_eq!(index.latest_version(b"b"), Some(Version::new(5)));
        assert_eq!(content.len(), 2);
        assert!(index.lookup(b"a", ReadView::new(Version::new(4))).is_none());
    }

    #[test]
    fn test_delete_replays_as_tombstone() {
        let index = IndexTree::new();
        let content = ContentStore::new();
        let mut replayer = StateReplayer::new(&index, &content);

        replayer
            .apply_commit(&ReplayedCommit {
                version: Version::new(1),
                writes: vec![put("k", "v")],
            })
            .unwrap();
        replayer
            .apply_commit(&ReplayedCommit {
                version: Version::new(2),
                writes: vec![WalOperation::Delete { key: b"k".to_vec() }],
            })
            .unwrap();

        let entry = index.lookup(b"k", ReadView::latest()).unwrap();
        assert!(entry.is_tombstone());
    }

    #[test]
    fn test_value_not_matching_address_is_corrupt() {
        let index = IndexTree::new();
        let content = ContentStore::new();
        let mut replayer = StateReplayer::new(&index, &content);

        let err = replayer
            .apply_commit(&ReplayedCommit {
                version: Version::new(1),
                writes: vec![WalOperation::Put {
                    key: b"k".to_vec(),
                    address: ContentAddress::of(b"expected"),
                    value: b"actual".to_vec(),
                }],
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLog);
    }
}
