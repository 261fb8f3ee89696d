//! Multi-version concurrency control
//!
//! - `Version` / `TxnId`: commit and transaction identities
//! - `VersionChain`: per-key history of values and tombstones
//! - `ReadView` / `Visibility`: snapshot isolation
//! - `CommitAuthority`: version assignment under the commit lock
//! - `ActiveSnapshots` / `GcReport`: pruning below the oldest snapshot
//! - `Transaction` / `TransactionManager`: begin, read, write, commit, abort

mod commit_authority;
mod gc;
mod manager;
mod read_view;
mod transaction;
mod version;
mod version_chain;
mod visibility;

pub use commit_authority::{CommitAuthority, CommitAuthorityError};
pub use gc::{ActiveSnapshots, GcReport};
pub(crate) use manager::CommitState;
pub use manager::TransactionManager;
pub use read_view::ReadView;
pub use transaction::{PendingWrite, Transaction, TxnState};
pub use version::{TxnId, Version};
pub use version_chain::{IndexEntry, VersionChain, VersionedValue, ENTRY_METADATA_BYTES};
pub use visibility::{Visibility, VisibilityResult};
