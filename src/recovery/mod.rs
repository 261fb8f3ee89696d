//! Startup recovery
//!
//! # Startup Sequence (strict order)
//!
//! 1. Load the checkpoint named by the marker, if any (checksum verified)
//! 2. Read the WAL durable prefix
//! 3. Skip commits at or below the checkpoint version
//! 4. Apply every later commit atomically, in log order
//! 5. Restore the commit authority to the highest version seen
//! 6. Truncate the WAL to its durable prefix and reopen it for appends
//!
//! A torn or corrupt WAL tail is logged and discarded; it is not an error.
//! A corrupt checkpoint is.

mod replay;

pub use replay::{ReplayStats, ReplayTarget, StateReplayer};

use serde::Serialize;

use crate::checkpoint::load_checkpoint;
use crate::config::EngineConfig;
use crate::content::ContentStore;
use crate::crash_point::{maybe_crash, points};
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::mvcc::{CommitAuthority, Version};
use crate::observability::{log_event, log_event_with_fields, Event};
use crate::wal::{wal_path, ReplayedLog, WalOperation, WalWriter};

/// What recovery found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Version of the checkpoint recovery started from
    pub checkpoint_version: Option<Version>,
    pub replayed_commits: u64,
    /// WAL commits already contained in the checkpoint
    pub skipped_commits: u64,
    /// A torn or corrupt tail was cut from the WAL
    pub truncated_tail: bool,
    pub discarded_bytes: u64,
    /// Highest committed version after recovery
    pub recovered_version: Version,
}

/// State rebuilt from disk, ready to serve
pub(crate) struct RecoveredState {
    pub authority: CommitAuthority,
    pub wal: WalWriter,
    pub index: IndexTree,
    pub content: ContentStore,
    pub report: RecoveryReport,
}

pub(crate) fn recover(config: &EngineConfig) -> Result<RecoveredState> {
    log_event(Event::RecoveryStart);
    match recover_inner(config) {
        Ok(state) => {
            let report = &state.report;
            log_event_with_fields(
                Event::RecoveryComplete,
                &[
                    (
                        "checkpoint_version",
                        &report
                            .checkpoint_version
                            .map_or_else(|| "none".to_string(), |v| v.to_string()),
                    ),
                    ("replayed_commits", &report.replayed_commits.to_string()),
                    ("skipped_commits", &report.skipped_commits.to_string()),
                    ("recovered_version", &report.recovered_version.to_string()),
                ],
            );
            Ok(state)
        }
        Err(err) => {
            log_event_with_fields(
                Event::RecoveryFailed,
                &[("code", err.code()), ("error", &err.to_string())],
            );
            Err(err)
        }
    }
}

fn recover_inner(config: &EngineConfig) -> Result<RecoveredState> {
    let data_dir = config.data_path();
    let index = IndexTree::with_fanout(config.btree_fanout);
    let content = ContentStore::new();
    let mut authority = CommitAuthority::new();
    let mut report = RecoveryReport::default();

    if let Some((marker, snapshot)) = load_checkpoint(data_dir)? {
        for (address, bytes) in &snapshot.blobs {
            content.insert_verified(*address, bytes)?;
        }
        for (key, chain) in snapshot.chains {
            index.load_chain(&key, chain);
        }
        authority = CommitAuthority::from_replayed_commit(marker.version);
        report.checkpoint_version = Some(marker.version);
    }

    maybe_crash(points::RECOVERY_AFTER_CHECKPOINT_LOAD);

    let log = ReplayedLog::read(&wal_path(data_dir))?;
    let stats = replay_commits(&log, &mut authority, &mut StateReplayer::new(&index, &content))?;
    report.replayed_commits = stats.replayed;
    report.skipped_commits = stats.skipped;

    if log.has_torn_tail() {
        report.truncated_tail = true;
        report.discarded_bytes = log.file_len - log.durable_len;
        let reason = log
            .tail_error
            .as_ref()
            .map_or_else(|| "incomplete commit".to_string(), |e| e.to_string());
        log_event_with_fields(
            Event::WalTailTruncated,
            &[
                ("durable_len", &log.durable_len.to_string()),
                ("discarded_bytes", &report.discarded_bytes.to_string()),
                ("discarded_records", &log.discarded_records.to_string()),
                ("reason", &reason),
            ],
        );
    }

    let wal = WalWriter::resume(data_dir, config.wal_sync_mode, &log)?;
    report.recovered_version = authority.highest();

    Ok(RecoveredState {
        authority,
        wal,
        index,
        content,
        report,
    })
}

/// Applies the commits of `log` newer than `authority.highest()` to
/// `target`, advancing the authority past each one.
pub fn replay_commits<T: ReplayTarget>(
    log: &ReplayedLog,
    authority: &mut CommitAuthority,
    target: &mut T,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for commit in &log.commits {
        if commit.version <= authority.highest() {
            stats.skipped += 1;
            continue;
        }
        authority
            .observe_replayed_commit(commit.version)
            .map_err(|e| Error::CorruptLog(e.to_string()))?;
        target.apply_commit(commit)?;

        stats.replayed += 1;
        for op in &commit.writes {
            match op {
                WalOperation::Put { .. } => stats.puts += 1,
                WalOperation::Delete { .. } => stats.deletes += 1,
                WalOperation::Commit { .. } => {}
            }
        }
    }
    Ok(stats)
}
