//! Ordered primary index
//!
//! Keys map to version chains in a copy-on-write B+-tree. The index is
//! derived state: it is rebuilt on startup from the latest checkpoint and
//! the WAL.
//!
//! # Invariants
//!
//! - Keys iterate in ascending byte order
//! - A published root is never modified
//! - One `apply` publishes all of a commit's entries at once
//! - Every non-root node holds between fan-out/2 and fan-out slots

mod btree;
mod node;
mod scan;

pub use btree::{IndexCounts, IndexSnapshot, IndexTree, PruneReport};
pub use node::{DEFAULT_FANOUT, MIN_FANOUT};
pub use scan::{ChainIter, RangeScan};
