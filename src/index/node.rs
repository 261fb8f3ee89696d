//! B+-tree nodes
//!
//! Nodes are immutable once published. A mutation builds new nodes along
//! the root-to-leaf path and shares every other subtree with the previous
//! root through `Arc`.
//!
//! For separators `[k1, .., kn]` and children `[c0, .., cn]`, child `ci`
//! holds keys in `[k(i), k(i+1))` with `k0 = -inf` and `k(n+1) = +inf`.

use std::sync::Arc;

use crate::mvcc::VersionChain;

/// Smallest fan-out the tree accepts
pub const MIN_FANOUT: usize = 4;

/// Default fan-out
pub const DEFAULT_FANOUT: usize = 64;

pub(crate) type Key = Vec<u8>;

#[derive(Debug, Clone)]
pub(crate) struct LeafNode {
    /// Sorted by key, no duplicates
    pub entries: Vec<(Key, Arc<VersionChain>)>,
}

#[derive(Debug, Clone)]
pub(crate) struct InteriorNode {
    pub keys: Vec<Key>,
    pub children: Vec<Arc<Node>>,
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf(LeafNode {
            entries: Vec::new(),
        })
    }

    /// Entries of a leaf or children of an interior node
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Interior(interior) => interior.children.len(),
        }
    }
}

impl LeafNode {
    /// Binary search for `key`
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }
}

impl InteriorNode {
    /// Index of the child whose range contains `key`. Keys equal to a
    /// separator descend to its right.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }
}

/// Result of a child split: separator and new right sibling
pub(crate) type Split = (Key, Arc<Node>);

/// Split an overfull leaf in half.
pub(crate) fn split_leaf(mut entries: Vec<(Key, Arc<VersionChain>)>) -> (Arc<Node>, Split) {
    let mid = entries.len() / 2;
    let right_entries = entries.split_off(mid);
    let separator = right_entries[0].0.clone();
    (
        Arc::new(Node::Leaf(LeafNode { entries })),
        (
            separator,
            Arc::new(Node::Leaf(LeafNode {
                entries: right_entries,
            })),
        ),
    )
}

/// Split an overfull interior node, moving the middle separator up.
pub(crate) fn split_interior(mut keys: Vec<Key>, mut children: Vec<Arc<Node>>) -> (Arc<Node>, Split) {
    let mid = keys.len() / 2;
    let right_keys = keys.split_off(mid + 1);
    let up = keys.pop().unwrap_or_default();
    let right_children = children.split_off(mid + 1);
    (
        Arc::new(Node::Interior(InteriorNode { keys, children })),
        (
            up,
            Arc::new(Node::Interior(InteriorNode {
                keys: right_keys,
                children: right_children,
            })),
        ),
    )
}

/// Restore minimum occupancy of `children[idx]` by borrowing from a
/// sibling or merging with one. `keys`/`children` belong to the parent and
/// are modified in place.
pub(crate) fn rebalance_child(
    keys: &mut Vec<Key>,
    children: &mut Vec<Arc<Node>>,
    idx: usize,
    min: usize,
) {
    if children[idx].len() >= min || children.len() < 2 {
        return;
    }

    if idx > 0 && children[idx - 1].len() > min {
        borrow_from_left(keys, children, idx);
    } else if idx + 1 < children.len() && children[idx + 1].len() > min {
        borrow_from_right(keys, children, idx);
    } else if idx > 0 {
        merge_children(keys, children, idx - 1);
    } else {
        merge_children(keys, children, idx);
    }
}

fn borrow_from_left(keys: &mut [Key], children: &mut [Arc<Node>], idx: usize) {
    let mut left = (*children[idx - 1]).clone();
    let mut child = (*children[idx]).clone();

    match (&mut left, &mut child) {
        (Node::Leaf(left), Node::Leaf(child)) => {
            if let Some(moved) = left.entries.pop() {
                keys[idx - 1] = moved.0.clone();
                child.entries.insert(0, moved);
            }
        }
        (Node::Interior(left), Node::Interior(child)) => {
            if let (Some(moved), Some(up)) = (left.children.pop(), left.keys.pop()) {
                let down = std::mem::replace(&mut keys[idx - 1], up);
                child.keys.insert(0, down);
                child.children.insert(0, moved);
            }
        }
        _ => unreachable!("siblings sit at the same depth"),
    }

    children[idx - 1] = Arc::new(left);
    children[idx] = Arc::new(child);
}

fn borrow_from_right(keys: &mut [Key], children: &mut [Arc<Node>], idx: usize) {
    let mut child = (*children[idx]).clone();
    let mut right = (*children[idx + 1]).clone();

    match (&mut child, &mut right) {
        (Node::Leaf(child), Node::Leaf(right)) => {
            let moved = right.entries.remove(0);
            child.entries.push(moved);
            if let Some((first, _)) = right.entries.first() {
                keys[idx] = first.clone();
            }
        }
        (Node::Interior(child), Node::Interior(right)) => {
            let moved = right.children.remove(0);
            let up = right.keys.remove(0);
            let down = std::mem::replace(&mut keys[idx], up);
            child.keys.push(down);
            child.children.push(moved);
        }
        _ => unreachable!("siblings sit at the same depth"),
    }

    children[idx] = Arc::new(child);
    children[idx + 1] = Arc::new(right);
}

/// Merge `children[left_idx + 1]` into `children[left_idx]`.
fn merge_children(keys: &mut Vec<Key>, children: &mut Vec<Arc<Node>>, left_idx: usize) {
    let separator = keys.remove(left_idx);
    let right = children.remove(left_idx + 1);
    let mut left = (*children[left_idx]).clone();

    match (&mut left, &*right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            left.entries.extend(right.entries.iter().cloned());
        }
        (Node::Interior(left), Node::Interior(right)) => {
            left.keys.push(separator);
            left.keys.extend(right.keys.iter().cloned());
            left.children.extend(right.children.iter().cloned());
        }
        _ => unreachable!("siblings sit at the same depth"),
    }

    children[left_idx] = Arc::new(left);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[&str]) -> Arc<Node> {
        Arc::new(Node::Leaf(LeafNode {
            entries: keys
                .iter()
                .map(|k| (k.as_bytes().to_vec(), Arc::new(VersionChain::new())))
                .collect(),
        }))
    }

    fn leaf_keys(node: &Node) -> Vec<String> {
        match node {
            Node::Leaf(leaf) => leaf
                .entries
                .iter()
                .map(|(k, _)| String::from_utf8(k.clone()).unwrap())
                .collect(),
            Node::Interior(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_child_index_sends_equal_keys_right() {
        let interior = InteriorNode {
            keys: vec![b"m".to_vec()],
            children: vec![leaf(&["a"]), leaf(&["m"])],
        };
        assert_eq!(interior.child_index(b"a"), 0);
        assert_eq!(interior.child_index(b"m"), 1);
        assert_eq!(interior.child_index(b"z"), 1);
    }

    #[test]
    fn test_split_leaf_uses_right_first_key() {
        let entries = match &*leaf(&["a", "b", "c", "d", "e"]) {
            Node::Leaf(l) => l.entries.clone(),
            _ => unreachable!(),
        };
        let (left, (sep, right)) = split_leaf(entries);
        assert_eq!(leaf_keys(&left), vec!["a", "b"]);
        assert_eq!(leaf_keys(&right), vec!["c", "d", "e"]);
        assert_eq!(sep, b"c".to_vec());
    }

    #[test]
    fn test_rebalance_borrows_from_left() {
        let mut keys = vec![b"d".to_vec()];
        let mut children = vec![leaf(&["a", "b", "c"]), leaf(&["d"])];
        rebalance_child(&mut keys, &mut children, 1, 2);

        assert_eq!(leaf_keys(&children[0]), vec!["a", "b"]);
        assert_eq!(leaf_keys(&children[1]), vec!["c", "d"]);
        assert_eq!(keys, vec![b"c".to_vec()]);
    }

    #[test]
    fn test_rebalance_borrows_from_right() {
        let mut keys = vec![b"c".to_vec()];
        let mut children = vec![leaf(&["a"]), leaf(&["c", "d", "e"])];
        rebalance_child(&mut keys, &mut children, 0, 2);

        assert_eq!(leaf_keys(&children[0]), vec!["a", "c"]);
        assert_eq!(leaf_keys(&children[1]), vec!["d", "e"]);
        assert_eq!(keys, vec![b"d".to_vec()]);
    }

    #[test]
    fn test_rebalance_merges_when_siblings_are_minimal() {
        let mut keys = vec![b"c".to_vec(), b"e".to_vec()];
        let mut children = vec![leaf(&["a", "b"]), leaf(&["c"]), leaf(&["e", "f"])];
        rebalance_child(&mut keys, &mut children, 1, 2);

        assert_eq!(children.len(), 2);
        assert_eq!(leaf_keys(&children[0]), vec!["a", "b", "c"]);
        assert_eq!(keys, vec![b"e".to_vec()]);
    }
}
