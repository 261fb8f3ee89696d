//! Transactions
//!
//! A transaction is owned by the caller that began it. It carries the read
//! view fixed at `begin`, the keys it read and a private write-set that
//! stays invisible to everyone else until commit.
//!
//! State machine: `Active -> {Committed, Aborted}`; terminal states are
//! final. Dropping an active transaction releases its snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::{ActiveSnapshots, ReadView, TxnId, Version};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxnState::Active)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Active => write!(f, "active"),
            TxnState::Committed => write!(f, "committed"),
            TxnState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Buffered mutation of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Put(Vec<u8>),
    Delete,
}

pub struct Transaction {
    id: TxnId,
    view: ReadView,
    state: TxnState,
    read_set: BTreeSet<Vec<u8>>,
    write_set: BTreeMap<Vec<u8>, PendingWrite>,
    registry: Arc<ActiveSnapshots>,
    registered: bool,
}

impl Transaction {
    /// Wraps a view already registered in `registry`.
    pub(crate) fn new(id: TxnId, view: ReadView, registry: Arc<ActiveSnapshots>) -> Self {
        Self {
            id,
            view,
            state: TxnState::Active,
            read_set: BTreeSet::new(),
            write_set: BTreeMap::new(),
            registry,
            registered: true,
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Snapshot version fixed at begin
    pub fn start_version(&self) -> Version {
        self.view.upper_bound()
    }

    pub fn read_view(&self) -> ReadView {
        self.view
    }

    /// Keys read through the index so far
    pub fn read_set(&self) -> &BTreeSet<Vec<u8>> {
        &self.read_set
    }

    pub fn write_set(&self) -> &BTreeMap<Vec<u8>, PendingWrite> {
        &self.write_set
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.state == TxnState::Active {
            Ok(())
        } else {
            Err(Error::InvalidTxnState {
                txn: self.id,
                state: self.state,
            })
        }
    }

    /// Buffers `key -> value`, replacing any earlier buffered write.
    pub(crate) fn buffer_put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.write_set
            .insert(key.to_vec(), PendingWrite::Put(value.to_vec()));
        Ok(())
    }

    pub(crate) fn buffer_delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key.to_vec(), PendingWrite::Delete);
        Ok(())
    }

    pub(crate) fn pending(&self, key: &[u8]) -> Option<&PendingWrite> {
        self.write_set.get(key)
    }

    pub(crate) fn record_read(&mut self, key: &[u8]) {
        if !self.read_set.contains(key) {
            self.read_set.insert(key.to_vec());
        }
    }

    pub(crate) fn take_writes(&mut self) -> BTreeMap<Vec<u8>, PendingWrite> {
        std::mem::take(&mut self.write_set)
    }

    /// Moves to a terminal state and releases the snapshot.
    pub(crate) fn finish(&mut self, state: TxnState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.write_set.clear();
        self.release();
    }

    fn release(&mut self) {
        if self.registered {
            self.registry.unregister(self.view);
            self.registered = false;
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_version", &self.view.upper_bound())
            .field("state", &self.state)
            .field("reads", &self.read_set.len())
            .field("writes", &self.write_set.len())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.release();
    }
}
