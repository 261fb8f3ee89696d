//! Copy-on-write B+-tree over version chains
//!
//! Leaves map keys to their version chains; interior nodes hold separators
//! and `Arc` children. A mutation copies the root-to-leaf path, shares every
//! other subtree with the previous root and publishes the new root with a
//! single pointer swap. Readers clone the root `Arc` and never observe a
//! partially applied mutation.
//!
//! Mutations are serialized by an internal writer lock; readers never take
//! it.

use std::ops::Bound;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::node::{
    rebalance_child, split_interior, split_leaf, InteriorNode, Key, LeafNode, Node, Split,
    DEFAULT_FANOUT, MIN_FANOUT,
};
use super::scan::{ChainIter, RangeScan};
use crate::mvcc::{IndexEntry, ReadView, Version, VersionChain, VersionedValue, ENTRY_METADATA_BYTES};

/// Aggregate counters maintained with every published root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounts {
    /// Keys with at least one retained entry
    pub distinct_keys: u64,
    /// Keys whose newest entry is a value
    pub live_keys: u64,
    /// Retained entries across all chains
    pub entries: u64,
    /// Bytes of distinct keys
    pub key_bytes: u64,
}

impl IndexCounts {
    /// Key bytes plus fixed per-entry metadata
    pub fn metadata_bytes(&self) -> u64 {
        self.key_bytes + self.entries * ENTRY_METADATA_BYTES
    }

    fn add_chain(&mut self, key: &[u8], chain: &VersionChain) {
        if chain.is_empty() {
            return;
        }
        self.distinct_keys += 1;
        self.key_bytes += key.len() as u64;
        self.entries += chain.len() as u64;
        if chain.latest().is_some_and(|e| !e.is_tombstone()) {
            self.live_keys += 1;
        }
    }

    fn remove_chain(&mut self, key: &[u8], chain: &VersionChain) {
        if chain.is_empty() {
            return;
        }
        self.distinct_keys -= 1;
        self.key_bytes -= key.len() as u64;
        self.entries -= chain.len() as u64;
        if chain.latest().is_some_and(|e| !e.is_tombstone()) {
            self.live_keys -= 1;
        }
    }
}

#[derive(Debug, Clone)]
struct Published {
    root: Arc<Node>,
    counts: IndexCounts,
}

/// Result of a pruning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub pruned_versions: u64,
    pub removed_keys: u64,
}

/// Immutable view of one published root
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    root: Arc<Node>,
}

impl IndexSnapshot {
    /// Visible entry for `key`, tombstones included
    pub fn lookup(&self, key: &[u8], view: ReadView) -> Option<IndexEntry> {
        find_chain(&self.root, key).and_then(|chain| chain.visible(view).copied())
    }

    pub fn chain(&self, key: &[u8]) -> Option<Arc<VersionChain>> {
        find_chain(&self.root, key)
    }

    pub fn range_scan(&self, start: Bound<&[u8]>, end: Bound<&[u8]>, view: ReadView) -> RangeScan {
        RangeScan::new(Arc::clone(&self.root), start, end, view)
    }

    /// Every `(key, chain)` in key order
    pub fn chains(&self) -> ChainIter {
        ChainIter::seek(Arc::clone(&self.root), Bound::Unbounded)
    }
}

/// Ordered index mapping keys to version chains.
pub struct IndexTree {
    published: RwLock<Published>,
    writer: Mutex<()>,
    fanout: usize,
}

impl IndexTree {
    pub fn new() -> Self {
        Self::with_fanout(DEFAULT_FANOUT)
    }

    /// Tree whose nodes hold at most `fanout` entries or children
    pub fn with_fanout(fanout: usize) -> Self {
        Self {
            published: RwLock::new(Published {
                root: Arc::new(Node::empty_leaf()),
                counts: IndexCounts::default(),
            }),
            writer: Mutex::new(()),
            fanout: fanout.max(MIN_FANOUT),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    fn min_occupancy(&self) -> usize {
        self.fanout / 2
    }

    fn load(&self) -> Published {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: Published) {
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Current root
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            root: self.load().root,
        }
    }

    pub fn counts(&self) -> IndexCounts {
        self.load().counts
    }

    /// Visible entry for `key` under `view` (may be a tombstone)
    pub fn lookup(&self, key: &[u8], view: ReadView) -> Option<IndexEntry> {
        self.snapshot().lookup(key, view)
    }

    /// Newest committed version of `key`, tombstones included
    pub fn latest_version(&self, key: &[u8]) -> Option<Version> {
        self.snapshot()
            .chain(key)
            .and_then(|chain| chain.latest().map(|e| e.version))
    }

    pub fn range_scan(&self, start: Bound<&[u8]>, end: Bound<&[u8]>, view: ReadView) -> RangeScan {
        self.snapshot().range_scan(start, end, view)
    }

    /// Appends one entry per write at `version` and publishes the result
    /// as a single new root.
    pub fn apply<'a, I>(&self, version: Version, writes: I)
    where
        I: IntoIterator<Item = (&'a [u8], VersionedValue)>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.load();

        for (key, value) in writes {
            let entry = IndexEntry { version, value };
            let previous = find_chain(&next.root, key);
            if let Some(prev) = &previous {
                next.counts.remove_chain(key, prev);
            }

            let mut chain = previous.map(|c| (*c).clone()).unwrap_or_default();
            chain.push(entry);
            next.counts.add_chain(key, &chain);
            next.root = self.upsert_root(&next.root, key, Arc::new(chain));
        }

        self.publish(next);
    }

    /// Replaces the chain of `key` wholesale. Used to restore a checkpoint.
    pub fn load_chain(&self, key: &[u8], chain: VersionChain) {
        if chain.is_empty() {
            return;
        }
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.load();
        if let Some(prev) = find_chain(&next.root, key) {
            next.counts.remove_chain(key, &prev);
        }
        next.counts.add_chain(key, &chain);
        next.root = self.upsert_root(&next.root, key, Arc::new(chain));
        self.publish(next);
    }

    /// Removes `key` and its whole chain; returns false if absent.
    pub fn remove(&self, key: &[u8]) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.load();
        match self.remove_root(&next.root, key) {
            Some((root, chain)) => {
                next.counts.remove_chain(key, &chain);
                next.root = root;
                self.publish(next);
                true
            }
            None => false,
        }
    }

    /// Drops entries no reader at or above `floor` can see, and keys that
    /// are deleted for every such reader.
    pub fn prune(&self, floor: Version) -> PruneReport {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.load();
        let mut report = PruneReport::default();

        let candidates: Vec<(Key, Arc<VersionChain>)> = ChainIter::seek(Arc::clone(&next.root), Bound::Unbounded)
            .filter(|(_, chain)| {
                chain.len() > 1 || chain.is_dead(floor)
            })
            .collect();

        for (key, chain) in candidates {
            let mut pruned = (*chain).clone();
            let removed = pruned.prune(floor) as u64;

            if pruned.is_dead(floor) {
                if let Some((root, old)) = self.remove_root(&next.root, &key) {
                    next.counts.remove_chain(&key, &old);
                    next.root = root;
                    report.removed_keys += 1;
                    report.pruned_versions += removed + 1;
                }
            } else if removed > 0 {
                next.counts.remove_chain(&key, &chain);
                next.counts.add_chain(&key, &pruned);
                next.root = self.upsert_root(&next.root, &key, Arc::new(pruned));
                report.pruned_versions += removed;
            }
        }

        self.publish(next);
        report
    }

    /// Number of levels from root to leaves
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut node = self.load().root;
        loop {
            let child = match &*node {
                Node::Interior(interior) => Arc::clone(&interior.children[0]),
                Node::Leaf(_) => return depth,
            };
            depth += 1;
            node = child;
        }
    }

    /// Loads the published root and walks its leftmost path. Returns the
    /// depth, or why the root cannot serve reads. Visits one node per
    /// level; [`IndexTree::check_invariants`] is the full traversal.
    pub fn root_status(&self) -> Result<usize, String> {
        let Published { root, counts } = self.load();
        let mut depth = 1;
        let mut node = root;
        loop {
            let child = match &*node {
                Node::Leaf(leaf) => {
                    if depth == 1 && leaf.entries.len() as u64 != counts.distinct_keys {
                        return Err(format!(
                            "root leaf holds {} keys, counts record {}",
                            leaf.entries.len(),
                            counts.distinct_keys
                        ));
                    }
                    return Ok(depth);
                }
                Node::Interior(interior) => {
                    if interior.children.len() != interior.keys.len() + 1 {
                        return Err(format!(
                            "interior node at depth {} has {} separators for {} children",
                            depth,
                            interior.keys.len(),
                            interior.children.len()
                        ));
                    }
                    Arc::clone(&interior.children[0])
                }
            };
            depth += 1;
            node = child;
        }
    }

    fn upsert_root(&self, root: &Arc<Node>, key: &[u8], chain: Arc<VersionChain>) -> Arc<Node> {
        match self.upsert(root, key, chain) {
            (node, None) => node,
            (left, Some((separator, right))) => Arc::new(Node::Interior(InteriorNode {
                keys: vec![separator],
                children: vec![left, right],
            })),
        }
    }

    /// Path-copying insert or replace of `key`'s chain.
    fn upsert(&self, node: &Arc<Node>, key: &[u8], chain: Arc<VersionChain>) -> (Arc<Node>, Option<Split>) {
        match &**node {
            Node::Leaf(leaf) => {
                let mut entries = leaf.entries.clone();
                match leaf.search(key) {
                    Ok(idx) => entries[idx].1 = chain,
                    Err(idx) => entries.insert(idx, (key.to_vec(), chain)),
                }
                if entries.len() > self.fanout {
                    let (left, split) = split_leaf(entries);
                    (left, Some(split))
                } else {
                    (Arc::new(Node::Leaf(LeafNode { entries })), None)
                }
            }
            Node::Interior(interior) => {
                let idx = interior.child_index(key);
                let (child, split) = self.upsert(&interior.children[idx], key, chain);

                let mut keys = interior.keys.clone();
                let mut children = interior.children.clone();
                children[idx] = child;

                if let Some((separator, right)) = split {
                    keys.insert(idx, separator);
                    children.insert(idx + 1, right);
                }

                if children.len() > self.fanout {
                    let (left, split) = split_interior(keys, children);
                    (left, Some(split))
                } else {
                    (Arc::new(Node::Interior(InteriorNode { keys, children })), None)
                }
            }
        }
    }

    fn remove_root(&self, root: &Arc<Node>, key: &[u8]) -> Option<(Arc<Node>, Arc<VersionChain>)> {
        let (node, chain) = self.remove_from(root, key)?;
        // Collapse a root left with a single child
        let node = match &*node {
            Node::Interior(interior) if interior.children.len() == 1 => Arc::clone(&interior.children[0]),
            _ => node,
        };
        Some((node, chain))
    }

    /// Path-copying delete. The returned node may be under-full; the parent
    /// rebalances it.
    fn remove_from(&self, node: &Arc<Node>, key: &[u8]) -> Option<(Arc<Node>, Arc<VersionChain>)> {
        match &**node {
            Node::Leaf(leaf) => {
                let idx = leaf.search(key).ok()?;
                let mut entries = leaf.entries.clone();
                let (_, chain) = entries.remove(idx);
                Some((Arc::new(Node::Leaf(LeafNode { entries })), chain))
            }
            Node::Interior(interior) => {
                let idx = interior.child_index(key);
                let (child, chain) = self.remove_from(&interior.children[idx], key)?;

                let mut keys = interior.keys.clone();
                let mut children = interior.children.clone();
                children[idx] = child;
                rebalance_child(&mut keys, &mut children, idx, self.min_occupancy());

                Some((Arc::new(Node::Interior(InteriorNode { keys, children })), chain))
            }
        }
    }

    /// Verifies structural invariants; returns a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let published = self.load();
        let mut leaf_depth = None;
        let mut counts = IndexCounts::default();
        self.check_node(
            &published.root,
            None,
            None,
            true,
            1,
            &mut leaf_depth,
            &mut counts,
        )?;
        if counts != published.counts {
            return Err(format!(
                "counters drifted: tracked {:?}, actual {:?}",
                published.counts, counts
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        node: &Node,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        counts: &mut IndexCounts,
    ) -> Result<(), String> {
        if node.len() > self.fanout {
            return Err(format!("node with {} slots exceeds fan-out {}", node.len(), self.fanout));
        }
        if !is_root && node.len() < self.min_occupancy() {
            return Err(format!(
                "non-root node with {} slots below minimum {}",
                node.len(),
                self.min_occupancy()
            ));
        }

        let in_range = |key: &[u8]| lower.map_or(true, |lo| key >= lo) && upper.map_or(true, |hi| key < hi);

        match node {
            Node::Leaf(leaf) => {
                match leaf_depth {
                    Some(d) if *d != depth => {
                        return Err(format!("leaf at depth {} but others at {}", depth, d))
                    }
                    _ => *leaf_depth = Some(depth),
                }
                for pair in leaf.entries.windows(2) {
                    if pair[0].0 >= pair[1].0 {
                        return Err("leaf keys not strictly ascending".to_string());
                    }
                }
                for (key, chain) in &leaf.entries {
                    if !in_range(key) {
                        return Err(format!("key {:?} outside separator range", key));
                    }
                    if chain.is_empty() {
                        return Err(format!("key {:?} has an empty chain", key));
                    }
                    if VersionChain::from_entries(chain.entries().to_vec()).is_none() {
                        return Err(format!("chain of {:?} not ascending", key));
                    }
                    counts.add_chain(key, chain);
                }
                Ok(())
            }
            Node::Interior(interior) => {
                if interior.children.len() != interior.keys.len() + 1 {
                    return Err("interior node key/child count mismatch".to_string());
                }
                if interior.children.len() < 2 {
                    return Err("interior node with a single child".to_string());
                }
                for pair in interior.keys.windows(2) {
                    if pair[0] >= pair[1] {
                        return Err("separators not strictly ascending".to_string());
                    }
                }
                for (i, child) in interior.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(interior.keys[i - 1].as_slice()) };
                    let hi = if i == interior.keys.len() {
                        upper
                    } else {
                        Some(interior.keys[i].as_slice())
                    };
                    self.check_node(child, lo, hi, false, depth + 1, leaf_depth, counts)?;
                }
                Ok(())
            }
        }
    }
}

impl Default for IndexTree {
    fn default() -> Self {
        Self::new()
    }
}

fn find_chain(root: &Arc<Node>, key: &[u8]) -> Option<Arc<VersionChain>> {
    let mut node = Arc::clone(root);
    loop {
        let child = match &*node {
            Node::Interior(interior) => Arc::clone(&interior.children[interior.child_index(key)]),
            Node::Leaf(leaf) => {
                return leaf
                    .search(key)
                    .ok()
                    .map(|idx| Arc::clone(&leaf.entries[idx].1));
            }
        };
        node = child;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentAddress;

    fn key(i: usize) -> Vec<u8> {
        format!("key{:05}", i).into_bytes()
    }

    fn put(tree: &IndexTree, version: u64, k: &[u8], value: &[u8]) {
        tree.apply(
            Version::new(version),
            [(k, VersionedValue::Value(ContentAddress::of(value)))],
        );
    }

    fn delete(tree: &IndexTree, version: u64, k: &[u8]) {
        tree.apply(Version::new(version), [(k, VersionedValue::Tombstone)]);
    }

    #[test]
    fn test_empty_tree() {
        let tree = IndexTree::with_fanout(4);
        assert!(tree.lookup(b"a", ReadView::latest()).is_none());
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.counts(), IndexCounts::default());
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_root_status_reports_depth() {
        let tree = IndexTree::with_fanout(4);
        assert_eq!(tree.root_status(), Ok(1));

        for i in 0..200 {
            put(&tree, i as u64 + 1, &key(i), b"v");
        }
        assert!(tree.depth() > 2);
        assert_eq!(tree.root_status(), Ok(tree.depth()));
    }

    #[test]
    fn test_root_status_flags_count_mismatch() {
        let tree = IndexTree::with_fanout(4);
        put(&tree, 1, b"a", b"v");
        let Published { root, mut counts } = tree.load();
        counts.distinct_keys = 5;
        tree.publish(Published { root, counts });

        let reason = tree.root_status().unwrap_err();
        assert!(reason.contains("root leaf holds 1 keys"));
    }

    #[test]
    fn test_fanout_is_clamped() {
        assert_eq!(IndexTree::with_fanout(1).fanout(), MIN_FANOUT);
    }

    #[test]
    fn test_lookup_respects_view() {
        let tree = IndexTree::with_fanout(4);
        put(&tree, 1, b"a", b"one");
        put(&tree, 2, b"a", b"two");

        let old = tree.lookup(b"a", ReadView::new(Version::new(1))).unwrap();
        assert_eq!(old.value, VersionedValue::Value(ContentAddress::of(b"one")));

        let new = tree.lookup(b"a", ReadView::latest()).unwrap();
        assert_eq!(new.version, Version::new(2));
        assert_eq!(tree.latest_version(b"a"), Some(Version::new(2)));
    }

    #[test]
    fn test_splits_keep_invariants() {
        let tree = IndexTree::with_fanout(4);
        for i in 0..200 {
            put(&tree, i as u64 + 1, &key(i), b"v");
        }
        tree.check_invariants().unwrap();
        assert!(tree.depth() > 2);
        assert_eq!(tree.counts().live_keys, 200);

        for i in 0..200 {
            assert!(tree.lookup(&key(i), ReadView::latest()).is_some());
        }
    }

    #[test]
    fn test_remove_rebalances() {
        let tree = IndexTree::with_fanout(4);
        for i in 0..100 {
            put(&tree, i as u64 + 1, &key(i), b"v");
        }
        for i in (0..100).step_by(2) {
            assert!(tree.remove(&key(i)));
            tree.check_invariants().unwrap();
        }
        assert!(!tree.remove(&key(0)));
        assert_eq!(tree.counts().distinct_keys, 50);

        for i in (1..100).step_by(2) {
            assert!(tree.remove(&key(i)));
        }
        tree.check_invariants().unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.counts(), IndexCounts::default());
    }

    #[test]
    fn test_apply_publishes_all_writes_at_once() {
        let tree = IndexTree::with_fanout(4);
        let before = tree.snapshot();
        tree.apply(
            Version::new(1),
            [
                (b"a".as_slice(), VersionedValue::Value(ContentAddress::of(b"1"))),
                (b"b".as_slice(), VersionedValue::Value(ContentAddress::of(b"2"))),
            ],
        );

        assert!(before.lookup(b"a", ReadView::latest()).is_none());
        assert!(tree.lookup(b"a", ReadView::latest()).is_some());
        assert!(tree.lookup(b"b", ReadView::latest()).is_some());
    }

    #[test]
    fn test_counts_follow_tombstones() {
        let tree = IndexTree::with_fanout(4);
        put(&tree, 1, b"a", b"x");
        put(&tree, 2, b"b", b"y");
        delete(&tree, 3, b"a");

        let counts = tree.counts();
        assert_eq!(counts.distinct_keys, 2);
        assert_eq!(counts.live_keys, 1);
        assert_eq!(counts.entries, 3);
        assert_eq!(counts.key_bytes, 2);
        assert_eq!(counts.metadata_bytes(), 2 + 3 * ENTRY_METADATA_BYTES);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_prune_drops_old_versions_and_dead_keys() {
        let tree = IndexTree::with_fanout(4);
        put(&tree, 1, b"a", b"1");
        put(&tree, 2, b"a", b"2");
        put(&tree, 3, b"b", b"3");
        delete(&tree, 4, b"b");
        put(&tree, 5, b"a", b"5");

        let report = tree.prune(Version::new(4));
        assert_eq!(report.removed_keys, 1);
        assert_eq!(report.pruned_versions, 3);

        assert!(tree.snapshot().chain(b"b").is_none());
        let chain = tree.snapshot().chain(b"a").unwrap();
        assert_eq!(chain.len(), 2);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_prune_keeps_tombstone_visible_above_floor() {
        let tree = IndexTree::with_fanout(4);
        put(&tree, 1, b"a", b"1");
        delete(&tree, 3, b"a");

        let report = tree.prune(Version::new(2));
        assert_eq!(report, PruneReport::default());
        assert!(tree.lookup(b"a", ReadView::new(Version::new(2))).is_some());
    }

    #[test]
    fn test_load_chain_replaces() {
        let tree = IndexTree::with_fanout(4);
        let chain = VersionChain::from_entries(vec![
            IndexEntry::value(Version::new(1), ContentAddress::of(b"x")),
            IndexEntry::tombstone(Version::new(2)),
        ])
        .unwrap();
        tree.load_chain(b"k", chain);

        assert_eq!(tree.counts().entries, 2);
        assert_eq!(tree.counts().live_keys, 0);
        assert!(tree.lookup(b"k", ReadView::latest()).unwrap().is_tombstone());
    }
}
