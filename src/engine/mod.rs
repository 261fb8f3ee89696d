//! Engine façade
//!
//! `Engine` is the single entry point service layers call. It is `Send +
//! Sync` and meant to be shared behind an `Arc`; every method takes
//! `&self`. The engine owns no threads and never retries: conflicts and
//! I/O failures are returned to the caller.
//!
//! ```ignore
//! let engine = Engine::open(EngineConfig::new("/var/lib/aerokv"))?;
//! engine.put(b"user:1", b"alice")?;
//!
//! let mut txn = engine.begin()?;
//! let current = engine.read(&mut txn, b"user:1")?;
//! engine.write(&mut txn, b"user:2", b"bob")?;
//! engine.commit(&mut txn)?;
//! ```

mod health;
mod stats;

pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use stats::EngineStats;

use std::fs;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::checkpoint::{create_checkpoint, CheckpointReport};
use crate::config::{EngineConfig, WalSyncMode};
use crate::error::{Error, Result};
use crate::mvcc::{GcReport, Transaction, TransactionManager, Version};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::recovery::{recover, RecoveryReport};

pub struct Engine {
    config: EngineConfig,
    manager: TransactionManager,
    recovery: RecoveryReport,
    closed: AtomicBool,
}

impl Engine {
    /// Opens the data directory named by `config`, recovering committed
    /// state from the last checkpoint and the WAL.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `config` does not validate
    /// - `CorruptLog` if the checkpoint fails validation
    /// - `IoFailure` if the data directory or WAL cannot be opened
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Logger::set_min_severity(config.log_severity()?);

        let data_dir = config.data_path();
        log_event_with_fields(
            Event::EngineOpen,
            &[
                ("data_dir", &data_dir.display().to_string()),
                ("wal_sync_mode", &config.wal_sync_mode.to_string()),
                ("btree_fanout", &config.btree_fanout.to_string()),
            ],
        );
        fs::create_dir_all(data_dir).map_err(|e| {
            Error::io(
                format!("failed to create data directory {}", data_dir.display()),
                e,
            )
        })?;

        let state = recover(&config)?;
        let manager = TransactionManager::new(state.authority, state.wal, state.index, state.content);

        log_event_with_fields(
            Event::EngineReady,
            &[("version", &manager.current_version().to_string())],
        );

        Ok(Self {
            config,
            manager,
            recovery: state.report,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// What recovery found when this engine was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn current_version(&self) -> Version {
        self.manager.current_version()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Value of `key` at the current version
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.manager.get(key)
    }

    /// Binds `key` to `value` in a commit of its own
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Version> {
        self.ensure_open()?;
        let version = self.manager.put(key, value)?;
        self.maybe_checkpoint();
        Ok(version)
    }

    /// Deletes `key` in a commit of its own. Returns whether the key
    /// existed; deleting an absent key consumes no version.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let deleted = self.manager.remove(key)?;
        if deleted.is_some() {
            self.maybe_checkpoint();
        }
        Ok(deleted.is_some())
    }

    pub fn begin(&self) -> Result<Transaction> {
        self.ensure_open()?;
        Ok(self.manager.begin())
    }

    pub fn read(&self, txn: &mut Transaction, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.manager.read(txn, key)
    }

    pub fn write(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.manager.write(txn, key, value)
    }

    /// Buffers a delete of `key` in `txn`
    pub fn remove(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.manager.delete(txn, key)
    }

    /// Commits `txn`; `None` for an empty write-set.
    ///
    /// # Errors
    ///
    /// - `Conflict` if another transaction committed a key `txn` wrote
    ///   after `txn` began; `txn` is aborted and may be retried
    /// - `InvalidState` if `txn` is not active or the engine is closed
    /// - `IoFailure` if the WAL append fails; `txn` is aborted
    pub fn commit(&self, txn: &mut Transaction) -> Result<Option<Version>> {
        self.ensure_open()?;
        let version = self.manager.commit(txn)?;
        if version.is_some() {
            self.maybe_checkpoint();
        }
        Ok(version)
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.ensure_open()?;
        self.manager.abort(txn)
    }

    /// Ordered `(key, value)` pairs in range as `txn` sees them, at most
    /// `limit`. Resume a paginated scan with `Bound::Excluded(last_key)`.
    pub fn scan(
        &self,
        txn: &Transaction,
        start: Bound<&[u8]>,
        end: Bound<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        self.manager.scan(txn, start, end, limit)
    }

    pub fn stats(&self) -> EngineStats {
        let counts = self.manager.index().counts();
        let content = self.manager.content();
        let content_bytes = content.size_bytes();
        let wal_bytes = self.manager.lock_commit().wal.size_bytes();

        EngineStats {
            key_count: counts.live_keys,
            approx_size_bytes: content_bytes + counts.metadata_bytes(),
            current_version: self.manager.current_version(),
            content_blobs: content.len() as u64,
            content_bytes,
            index_entries: counts.entries,
            index_depth: self.manager.index().depth() as u64,
            wal_bytes,
            active_transactions: self.manager.active_transactions() as u64,
            metrics: self.manager.metrics().snapshot(),
        }
    }

    /// Makes every acknowledged commit durable and writes a checkpoint.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.checkpoint().map(|_| ())
    }

    /// Writes a checkpoint and truncates the WAL.
    pub fn checkpoint(&self) -> Result<CheckpointReport> {
        self.ensure_open()?;
        self.checkpoint_now()
    }

    fn checkpoint_now(&self) -> Result<CheckpointReport> {
        let mut state = self.manager.lock_commit();
        log_event_with_fields(
            Event::CheckpointStart,
            &[("version", &state.authority.highest().to_string())],
        );

        let had_unsynced = state.wal.has_unsynced();
        match create_checkpoint(
            self.config.data_path(),
            &mut state,
            self.manager.index(),
            self.manager.content(),
        ) {
            Ok(report) => {
                drop(state);
                let metrics = self.manager.metrics();
                metrics.increment_checkpoints();
                if had_unsynced {
                    metrics.increment_wal_fsyncs();
                }
                log_event_with_fields(
                    Event::CheckpointComplete,
                    &[
                        ("version", &report.version.to_string()),
                        ("keys", &report.keys.to_string()),
                        ("blobs", &report.blobs.to_string()),
                        ("dropped_blobs", &report.dropped_blobs.to_string()),
                        ("snapshot_bytes", &report.snapshot_bytes.to_string()),
                    ],
                );
                Ok(report)
            }
            Err(err) => {
                log_event_with_fields(
                    Event::CheckpointFailed,
                    &[("code", err.code().as_str()), ("error", &err.to_string())],
                );
                Err(err.into())
            }
        }
    }

    /// Checkpoints once the WAL grows past `checkpoint_wal_bytes`. The
    /// triggering commit is already durable, so a failure is logged and
    /// retried after the next commit.
    fn maybe_checkpoint(&self) {
        let threshold = self.config.checkpoint_wal_bytes;
        if threshold == 0 {
            return;
        }
        let wal_bytes = self.manager.lock_commit().wal.size_bytes();
        if wal_bytes <= threshold {
            return;
        }
        if let Err(err) = self.checkpoint_now() {
            log_event_with_fields(
                Event::CheckpointDeferred,
                &[
                    ("trigger", "wal_size"),
                    ("wal_bytes", &wal_bytes.to_string()),
                    ("code", err.code()),
                ],
            );
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let mut components = Vec::with_capacity(3);

        if self.is_closed() {
            components.push(ComponentHealth::failing("engine", "closed"));
        } else {
            components.push(ComponentHealth::ok("engine", "open"));
        }

        {
            let state = self.manager.lock_commit();
            let wal = &state.wal;
            if wal.is_poisoned() {
                components.push(ComponentHealth::failing(
                    "wal",
                    "writer poisoned after a failed rollback",
                ));
            } else if !wal.is_reachable() {
                components.push(ComponentHealth::failing(
                    "wal",
                    format!("log file unreachable: {}", wal.path().display()),
                ));
            } else {
                components.push(ComponentHealth::ok(
                    "wal",
                    format!("{} bytes, mode {}", wal.size_bytes(), wal.sync_mode()),
                ));
            }
        }

        let index = self.manager.index();
        match index.root_status() {
            Ok(depth) => components.push(ComponentHealth::ok(
                "index",
                format!("depth {}, {} keys", depth, index.counts().live_keys),
            )),
            Err(reason) => components.push(ComponentHealth::failing("index", reason)),
        }

        HealthReport::from_components(components)
    }

    /// Prunes versions no active transaction can read.
    pub fn collect_garbage(&self) -> Result<GcReport> {
        self.ensure_open()?;
        Ok(self.manager.collect_garbage())
    }

    /// Flushes and closes the engine. Later operations fail with
    /// `InvalidState`; closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.checkpoint_now()?;
        self.closed.store(true, Ordering::Release);
        log_event_with_fields(
            Event::EngineClose,
            &[("version", &self.manager.current_version().to_string())],
        );
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_closed() || self.config.wal_sync_mode != WalSyncMode::OnFlush {
            return;
        }
        let mut state = self.manager.lock_commit();
        if !state.wal.has_unsynced() {
            return;
        }
        if let Err(err) = state.wal.fsync() {
            log_event_with_fields(
                Event::CommitFailed,
                &[("stage", "fsync_on_drop"), ("error", &err.to_string())],
            );
        }
    }
}
