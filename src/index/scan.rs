//! Ordered iteration over a published tree
//!
//! Iterators own an `Arc` to the root they started from, so a scan keeps
//! reading one consistent tree even while commits publish new roots.

use std::ops::Bound;
use std::sync::Arc;

use super::node::{Key, Node};
use crate::content::ContentAddress;
use crate::mvcc::{ReadView, VersionChain, Visibility, VisibilityResult};

/// Lazy iterator over `(key, chain)` pairs in ascending key order.
pub struct ChainIter {
    /// Interior nodes on the current path with the next child to visit
    stack: Vec<(Arc<Node>, usize)>,
    /// Current leaf and the next entry to yield
    leaf: Option<(Arc<Node>, usize)>,
}

impl ChainIter {
    /// Positions the iterator at the first key satisfying `start`.
    pub(crate) fn seek(root: Arc<Node>, start: Bound<&[u8]>) -> Self {
        let mut stack = Vec::new();
        let mut node = root;
        let pos = loop {
            let child = match &*node {
                Node::Interior(interior) => {
                    let idx = match start {
                        Bound::Unbounded => 0,
                        Bound::Included(key) | Bound::Excluded(key) => interior.child_index(key),
                    };
                    (Arc::clone(&interior.children[idx]), idx + 1)
                }
                Node::Leaf(leaf) => {
                    break match start {
                        Bound::Unbounded => 0,
                        Bound::Included(key) => {
                            leaf.entries.partition_point(|(k, _)| k.as_slice() < key)
                        }
                        Bound::Excluded(key) => {
                            leaf.entries.partition_point(|(k, _)| k.as_slice() <= key)
                        }
                    };
                }
            };
            stack.push((node, child.1));
            node = child.0;
        };
        Self {
            stack,
            leaf: Some((node, pos)),
        }
    }

    /// Descend to the leftmost leaf under `node`.
    fn descend_leftmost(&mut self, mut node: Arc<Node>) {
        loop {
            let child = match &*node {
                Node::Interior(interior) => Arc::clone(&interior.children[0]),
                Node::Leaf(_) => break,
            };
            self.stack.push((node, 1));
            node = child;
        }
        self.leaf = Some((node, 0));
    }

    /// Move to the next leaf; returns false when the tree is exhausted.
    fn advance_leaf(&mut self) -> bool {
        loop {
            let child = match self.stack.last_mut() {
                None => return false,
                Some((node, idx)) => match &**node {
                    Node::Interior(interior) if *idx < interior.children.len() => {
                        let child = Arc::clone(&interior.children[*idx]);
                        *idx += 1;
                        Some(child)
                    }
                    _ => None,
                },
            };
            match child {
                Some(child) => {
                    self.descend_leftmost(child);
                    return true;
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl Iterator for ChainIter {
    type Item = (Key, Arc<VersionChain>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((node, pos)) = &mut self.leaf {
                if let Node::Leaf(leaf) = &**node {
                    if let Some((key, chain)) = leaf.entries.get(*pos) {
                        *pos += 1;
                        return Some((key.clone(), Arc::clone(chain)));
                    }
                }
                self.leaf = None;
            }
            if !self.advance_leaf() {
                return None;
            }
        }
    }
}

/// Lazy range scan yielding `(key, address)` for keys visible to a view.
///
/// Tombstoned and not-yet-visible keys are skipped. A scan can be resumed
/// by starting a new one at `Bound::Excluded(last_key)`.
pub struct RangeScan {
    chains: ChainIter,
    end: Bound<Key>,
    view: ReadView,
    done: bool,
}

impl RangeScan {
    pub(crate) fn new(root: Arc<Node>, start: Bound<&[u8]>, end: Bound<&[u8]>, view: ReadView) -> Self {
        Self {
            chains: ChainIter::seek(root, start),
            end: end.map(|k| k.to_vec()),
            view,
            done: false,
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => false,
            Bound::Included(end) => key > end.as_slice(),
            Bound::Excluded(end) => key >= end.as_slice(),
        }
    }
}

impl Iterator for RangeScan {
    type Item = (Key, ContentAddress);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some((key, chain)) = self.chains.next() else {
                self.done = true;
                break;
            };
            if self.past_end(&key) {
                self.done = true;
                break;
            }
            if let VisibilityResult::Visible { address, .. } = Visibility::resolve(&chain, self.view) {
                return Some((key, address));
            }
        }
        None
    }
}
