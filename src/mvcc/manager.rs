//! Transaction manager
//!
//! Owns the index, the content store and the commit path. All commits are
//! serialized by one mutex guarding the commit authority and the WAL
//! writer; readers never take it.
//!
//! Commit order:
//! 1. validate first-committer-wins against the index
//! 2. allocate the next version
//! 3. append mutation records and the commit marker to the WAL
//! 4. store values in the content store
//! 5. publish index entries as one new root
//! 6. advance the global version
//!
//! A transaction begun after step 6 observes the commit; one begun before
//! it does not, whatever happens to the root in between.

use std::cmp::Ordering as KeyOrdering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ActiveSnapshots, CommitAuthority, GcReport, IndexEntry, PendingWrite, ReadView, Transaction,
    TxnId, TxnState, Version, VersionedValue,
};
use crate::config::WalSyncMode;
use crate::content::{ContentAddress, ContentStore};
use crate::crash_point::{maybe_crash, points};
use crate::error::{Error, Result};
use crate::index::{IndexTree, RangeScan};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::wal::{WalErrorCode, WalOperation, WalWriter, MAX_ENTRY_BYTES};

/// State guarded by the commit lock
pub(crate) struct CommitState {
    pub(crate) authority: CommitAuthority,
    pub(crate) wal: WalWriter,
}

pub struct TransactionManager {
    commit: Mutex<CommitState>,
    /// Highest version whose index entries are published
    current: AtomicU64,
    next_txn: AtomicU64,
    snapshots: Arc<ActiveSnapshots>,
    index: IndexTree,
    content: ContentStore,
    metrics: MetricsRegistry,
    /// Largest key plus value accepted by a write
    max_entry_bytes: usize,
}

impl TransactionManager {
    /// Manager over recovered state. `authority.highest()` must equal the
    /// newest version present in `index`.
    pub(crate) fn new(
        authority: CommitAuthority,
        wal: WalWriter,
        index: IndexTree,
        content: ContentStore,
    ) -> Self {
        let current = authority.highest().value();
        Self {
            commit: Mutex::new(CommitState { authority, wal }),
            current: AtomicU64::new(current),
            next_txn: AtomicU64::new(1),
            snapshots: Arc::new(ActiveSnapshots::new()),
            index,
            content,
            metrics: MetricsRegistry::new(),
            max_entry_bytes: MAX_ENTRY_BYTES,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_entry_bytes(mut self, limit: usize) -> Self {
        self.max_entry_bytes = limit;
        self
    }

    pub fn index(&self) -> &IndexTree {
        &self.index
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Newest published version
    pub fn current_version(&self) -> Version {
        Version::new(self.current.load(Ordering::Acquire))
    }

    /// Snapshots held by live transactions and in-flight reads
    pub fn active_transactions(&self) -> usize {
        self.snapshots.len()
    }

    /// Locks the commit path. Checkpointing and GC hold this to exclude
    /// commits.
    pub(crate) fn lock_commit(&self) -> MutexGuard<'_, CommitState> {
        self.commit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self) -> Transaction {
        let id = TxnId::new(self.next_txn.fetch_add(1, Ordering::Relaxed));
        let view = self.snapshots.register_with(|| self.current_version());
        Transaction::new(id, view, Arc::clone(&self.snapshots))
    }

    /// Reads `key` as `txn` sees it: its own buffered writes first, then
    /// the index at its snapshot.
    pub fn read(&self, txn: &mut Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        txn.ensure_active()?;
        match txn.pending(key) {
            Some(PendingWrite::Put(value)) => return Ok(Some(value.clone())),
            Some(PendingWrite::Delete) => return Ok(None),
            None => {}
        }
        txn.record_read(key);
        self.read_at(key, txn.read_view())
    }

    pub fn write(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        txn.ensure_active()?;
        self.check_entry(key, value)?;
        txn.buffer_put(key, value)
    }

    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        txn.ensure_active()?;
        self.check_entry(key, &[])?;
        txn.buffer_delete(key)
    }

    /// Rejects a key and value whose WAL record would overflow its u32
    /// length fields.
    fn check_entry(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len().saturating_add(value.len()) > self.max_entry_bytes {
            return Err(Error::EntryTooLarge {
                key_len: key.len(),
                value_len: value.len(),
                limit: self.max_entry_bytes,
            });
        }
        Ok(())
    }

    /// Keys in `[start, end]` visible to `txn`, overlaid with its own
    /// writes, in ascending order. At most `limit` pairs are returned.
    pub fn scan(
        &self,
        txn: &Transaction,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        txn.ensure_active()?;
        if bounds_are_empty(start, end) {
            return Ok(Vec::new());
        }

        let committed = self.index.range_scan(start, end, txn.read_view()).peekable();
        let own = txn
            .write_set()
            .range::<[u8], _>((start, end))
            .peekable();
        self.merge_scan(committed, own, limit.unwrap_or(usize::MAX))
    }

    fn merge_scan<'a, W>(
        &self,
        mut committed: Peekable<RangeScan>,
        mut own: Peekable<W>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
    where
        W: Iterator<Item = (&'a Vec<u8>, &'a PendingWrite)>,
    {
        let mut out = Vec::new();
        while out.len() < limit {
            let order = match (committed.peek(), own.peek()) {
                (None, None) => break,
                (Some(_), None) => KeyOrdering::Less,
                (None, Some(_)) => KeyOrdering::Greater,
                (Some((c, _)), Some((o, _))) => c.as_slice().cmp(o.as_slice()),
            };

            if order == KeyOrdering::Less {
                if let Some((key, address)) = committed.next() {
                    out.push((key, self.fetch(&address)?));
                }
                continue;
            }
            if order == KeyOrdering::Equal {
                committed.next();
            }
            if let Some((key, PendingWrite::Put(value))) = own.next() {
                out.push((key.clone(), value.clone()));
            }
        }
        Ok(out)
    }

    /// Commits `txn`. Returns the assigned version, or `None` for an empty
    /// write-set, which consumes no version.
    ///
    /// # Errors
    ///
    /// - `InvalidTxnState` if `txn` is not active
    /// - `Conflict` if a written key was committed after `txn` began; the
    ///   transaction is aborted
    /// - `EntryTooLarge` if a buffered write exceeds the entry limit; the
    ///   transaction is aborted
    /// - `Io` if the WAL append fails; the transaction is aborted and no
    ///   version is consumed
    pub fn commit(&self, txn: &mut Transaction) -> Result<Option<Version>> {
        txn.ensure_active()?;
        if txn.write_set().is_empty() {
            txn.finish(TxnState::Committed);
            return Ok(None);
        }

        let mut state = self.lock_commit();

        if let Some(key) = self.first_conflict(txn) {
            txn.finish(TxnState::Aborted);
            self.metrics.increment_conflicts();
            self.metrics.increment_aborts();
            log_event_with_fields(
                Event::TxnConflict,
                &[
                    ("txn", &txn.id().to_string()),
                    ("start_version", &txn.start_version().to_string()),
                    ("key", &String::from_utf8_lossy(&key)),
                ],
            );
            return Err(Error::Conflict { txn: txn.id(), key });
        }

        let writes = txn.take_writes();
        match self.commit_locked(&mut state, writes) {
            Ok(version) => {
                txn.finish(TxnState::Committed);
                Ok(Some(version))
            }
            Err(err) => {
                txn.finish(TxnState::Aborted);
                self.metrics.increment_aborts();
                Err(err)
            }
        }
    }

    /// First written key whose newest committed version is past the
    /// transaction's snapshot.
    fn first_conflict(&self, txn: &Transaction) -> Option<Vec<u8>> {
        let start = txn.start_version();
        txn.write_set()
            .keys()
            .find(|key| {
                self.index
                    .latest_version(key)
                    .is_some_and(|latest| latest > start)
            })
            .cloned()
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        txn.ensure_active()?;
        txn.finish(TxnState::Aborted);
        self.metrics.increment_aborts();
        Ok(())
    }

    /// Single-key write in its own transaction. The snapshot is the
    /// current version under the commit lock, so it never conflicts.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Version> {
        self.check_entry(key, value)?;
        let mut state = self.lock_commit();
        let mut writes = BTreeMap::new();
        writes.insert(key.to_vec(), PendingWrite::Put(value.to_vec()));
        self.commit_locked(&mut state, writes)
    }

    /// Single-key delete. Returns `None` without consuming a version when
    /// the key is absent.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Version>> {
        self.check_entry(key, &[])?;
        let mut state = self.lock_commit();
        let live = self
            .index
            .lookup(key, ReadView::latest())
            .is_some_and(|entry| !entry.is_tombstone());
        if !live {
            return Ok(None);
        }
        let mut writes = BTreeMap::new();
        writes.insert(key.to_vec(), PendingWrite::Delete);
        self.commit_locked(&mut state, writes).map(Some)
    }

    /// Reads `key` at the current version.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let view = self.snapshots.register_with(|| self.current_version());
        let result = self.read_at(key, view);
        self.snapshots.unregister(view);
        result
    }

    fn read_at(&self, key: &[u8], view: ReadView) -> Result<Option<Vec<u8>>> {
        self.metrics.increment_reads();
        match self.index.lookup(key, view) {
            Some(IndexEntry {
                value: VersionedValue::Value(address),
                ..
            }) => self.fetch(&address).map(Some),
            _ => Ok(None),
        }
    }

    fn fetch(&self, address: &ContentAddress) -> Result<Vec<u8>> {
        Ok(self.content.get(address)?.to_vec())
    }

    /// Steps 2 to 6 of the commit order. The caller holds the commit lock
    /// and has checked `writes` for conflicts. Entry sizes are checked
    /// again here before a version is allocated.
    fn commit_locked(
        &self,
        state: &mut CommitState,
        writes: BTreeMap<Vec<u8>, PendingWrite>,
    ) -> Result<Version> {
        for (key, write) in &writes {
            match write {
                PendingWrite::Put(value) => self.check_entry(key, value)?,
                PendingWrite::Delete => self.check_entry(key, &[])?,
            }
        }

        let version = state.authority.next_version();
        let operations: Vec<WalOperation> = writes
            .into_iter()
            .map(|(key, write)| match write {
                PendingWrite::Put(value) => WalOperation::Put {
                    key,
                    address: ContentAddress::of(&value),
                    value,
                },
                PendingWrite::Delete => WalOperation::Delete { key },
            })
            .collect();

        let appended = match state.wal.append_commit(version, &operations) {
            Ok(bytes) => bytes,
            Err(err) => {
                let event = if err.code() == WalErrorCode::AeroWalPoisoned || state.wal.is_poisoned() {
                    Event::WalPoisoned
                } else {
                    Event::CommitFailed
                };
                log_event_with_fields(
                    event,
                    &[("version", &version.to_string()), ("error", &err.to_string())],
                );
                return Err(err.into());
            }
        };
        self.metrics
            .record_wal_append(operations.len() as u64 + 1, appended);
        if state.wal.sync_mode() == WalSyncMode::EveryCommit {
            self.metrics.increment_wal_fsyncs();
        }

        maybe_crash(points::COMMIT_AFTER_WAL);

        state
            .authority
            .mark_committed(version)
            .map_err(|e| Error::CorruptLog(e.to_string()))?;

        let mut entries = Vec::with_capacity(operations.len());
        for op in &operations {
            match op {
                WalOperation::Put {
                    key,
                    address,
                    value,
                } => {
                    self.content.put(value);
                    entries.push((key.as_slice(), VersionedValue::Value(*address)));
                }
                WalOperation::Delete { key } => {
                    entries.push((key.as_slice(), VersionedValue::Tombstone));
                }
                WalOperation::Commit { .. } => {}
            }
        }
        self.index.apply(version, entries);
        self.current.store(version.value(), Ordering::Release);

        self.metrics.increment_commits();
        self.metrics.add_writes(operations.len() as u64);
        Ok(version)
    }

    /// Prunes versions no active snapshot can read.
    pub fn collect_garbage(&self) -> GcReport {
        let _state = self.lock_commit();
        let floor = self.snapshots.visibility_floor(self.current_version());
        let pruned = self.index.prune(floor);
        self.metrics.record_gc(pruned.pruned_versions);

        let report = GcReport {
            floor,
            pruned_versions: pruned.pruned_versions,
            removed_keys: pruned.removed_keys,
        };
        log_event_with_fields(
            Event::GcComplete,
            &[
                ("floor", &floor.to_string()),
                ("pruned_versions", &report.pruned_versions.to_string()),
                ("removed_keys", &report.removed_keys.to_string()),
            ],
        );
        report
    }
}

/// True when no key can satisfy both bounds.
fn bounds_are_empty(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => s >= e,
        _ => false,
    }
}
