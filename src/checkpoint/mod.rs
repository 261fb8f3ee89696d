//! Checkpoint subsystem
//!
//! Checkpoint is the only mechanism that truncates the WAL.
//!
//! # Algorithm
//!
//! Runs with the commit lock held:
//!
//! 1. fsync WAL
//! 2. Drop blobs no retained index entry references
//! 3. Write `snapshot-<version>.dat` to a temp file, fsync, rename
//! 4. Write `checkpoint.json` to a temp file, fsync, rename, fsync dir
//! 5. Remove older snapshot files
//! 6. Truncate WAL to zero
//!
//! # Crash Safety
//!
//! - Crash before the marker rename: old marker and full WAL are used
//! - Crash after the marker but before truncation: new snapshot is used,
//!   WAL commits at or below its version are skipped
//! - Crash after truncation: new snapshot is used, WAL empty

mod errors;
mod marker;
mod snapshot;

pub use errors::{CheckpointError, CheckpointErrorCode, CheckpointResult, Severity};
pub use marker::{
    checkpoint_dir, format_checksum, marker_path, parse_checksum, CheckpointMarker,
    MARKER_FORMAT_VERSION,
};
pub use snapshot::{
    decode_snapshot, encode_snapshot, read_snapshot, snapshot_file_name, LoadedSnapshot,
    SNAPSHOT_FORMAT_VERSION, SNAPSHOT_MAGIC,
};

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::content::{ContentAddress, ContentStore};
use crate::crash_point::{maybe_crash, points};
use crate::index::IndexTree;
use crate::mvcc::{CommitState, Version};
use crate::wal::compute_checksum;

/// Outcome of one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointReport {
    pub version: Version,
    pub snapshot_file: String,
    pub keys: u64,
    pub blobs: u64,
    /// Unreferenced blobs dropped from the content store
    pub dropped_blobs: u64,
    pub snapshot_bytes: u64,
}

/// Writes a checkpoint of the published state and truncates the WAL.
///
/// The caller holds the commit lock through `state`, so the index is
/// exactly the state at `state.authority.highest()`.
///
/// # Errors
///
/// Any failure leaves the previous marker, its snapshot and the WAL intact.
pub(crate) fn create_checkpoint(
    data_dir: &Path,
    state: &mut CommitState,
    index: &IndexTree,
    content: &ContentStore,
) -> CheckpointResult<CheckpointReport> {
    maybe_crash(points::CHECKPOINT_START);

    state.wal.fsync()?;
    let version = state.authority.highest();

    let snapshot = index.snapshot();
    let live: HashSet<ContentAddress> = snapshot
        .chains()
        .flat_map(|(_, chain)| {
            chain
                .entries()
                .iter()
                .filter_map(|entry| entry.value.address())
                .collect::<Vec<_>>()
        })
        .collect();
    let dropped_blobs = content.retain(&live) as u64;
    let blobs = content.blobs();

    let keys = index.counts().distinct_keys;
    let image = encode_snapshot(version, &blobs, snapshot.chains())?;
    let checksum = compute_checksum(&image);

    let dir = checkpoint_dir(data_dir);
    let snapshot_file = snapshot_file_name(version);
    persist_file(&dir.join(&snapshot_file), &image)?;

    maybe_crash(points::CHECKPOINT_AFTER_SNAPSHOT);

    CheckpointMarker::new(version, snapshot_file.clone(), checksum)
        .write_to_file(&marker_path(data_dir))?;

    remove_stale_snapshots(&dir, &snapshot_file);

    maybe_crash(points::CHECKPOINT_BEFORE_WAL_TRUNCATE);

    state.wal.truncate()?;

    Ok(CheckpointReport {
        version,
        snapshot_file,
        keys,
        blobs: blobs.len() as u64,
        dropped_blobs,
        snapshot_bytes: image.len() as u64,
    })
}

/// Loads the checkpoint named by the marker, if any.
///
/// # Errors
///
/// `AERO_CHECKPOINT_CORRUPT` if the snapshot file does not match the
/// marker checksum or version, or does not decode.
pub fn load_checkpoint(data_dir: &Path) -> CheckpointResult<Option<(CheckpointMarker, LoadedSnapshot)>> {
    let Some(marker) = CheckpointMarker::load(&marker_path(data_dir))? else {
        return Ok(None);
    };

    let path = checkpoint_dir(data_dir).join(&marker.snapshot_file);
    if !path.exists() {
        return Err(CheckpointError::corrupt(format!(
            "snapshot file named by marker is missing: {}",
            path.display()
        )));
    }

    let (loaded, file_checksum) = read_snapshot(&path)?;
    let expected = marker.checksum()?;
    if file_checksum != expected {
        return Err(CheckpointError::corrupt(format!(
            "snapshot checksum {} does not match marker {}",
            format_checksum(file_checksum),
            marker.snapshot_checksum
        )));
    }
    if loaded.version != marker.version {
        return Err(CheckpointError::corrupt(format!(
            "snapshot version {} does not match marker version {}",
            loaded.version, marker.version
        )));
    }

    Ok(Some((marker, loaded)))
}

/// Writes `bytes` to `path` atomically: temp file, fsync, rename, fsync of
/// the parent directory.
pub(crate) fn persist_file(path: &Path, bytes: &[u8]) -> CheckpointResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CheckpointError::failed(format!("no parent directory: {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to create directory: {}", parent.display()),
            e,
        )
    })?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let mut file = File::create(&tmp_path).map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to create file: {}", tmp_path.display()),
            e,
        )
    })?;
    file.write_all(bytes).map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to write file: {}", tmp_path.display()),
            e,
        )
    })?;
    file.sync_all().map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to fsync file: {}", tmp_path.display()),
            e,
        )
    })?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        CheckpointError::failed_with_source(
            format!("Failed to rename into place: {}", path.display()),
            e,
        )
    })?;

    fsync_dir(parent)
}

fn fsync_dir(path: &Path) -> CheckpointResult<()> {
    let dir = OpenOptions::new().read(true).open(path).map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to open directory for fsync: {}", path.display()),
            e,
        )
    })?;
    dir.sync_all().map_err(|e| {
        CheckpointError::failed_with_source(
            format!("Failed to fsync directory: {}", path.display()),
            e,
        )
    })
}

/// Best effort removal of snapshot files other than `keep`.
fn remove_stale_snapshots(dir: &Path, keep: &str) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = name.starts_with("snapshot-") && name != keep;
        if stale && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}
