//! Checkpoint marker file handling
//!
//! The marker names the snapshot recovery starts from:
//! - version: highest commit contained in the snapshot
//! - snapshot_file: file name inside the checkpoint directory
//! - snapshot_checksum: CRC32 of the whole snapshot file (`crc32:xxxxxxxx`)
//! - created_at: RFC3339 timestamp
//! - format_version: always 1
//!
//! Location: `<data_dir>/checkpoint/checkpoint.json`
//!
//! The marker is written after the snapshot is durable and before the WAL
//! is truncated. A snapshot without a marker naming it is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{CheckpointError, CheckpointResult};
use super::persist_file;
use crate::mvcc::Version;

pub const MARKER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMarker {
    pub version: Version,
    pub snapshot_file: String,
    pub snapshot_checksum: String,
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
}

impl CheckpointMarker {
    pub fn new(version: Version, snapshot_file: impl Into<String>, checksum: u32) -> Self {
        Self {
            version,
            snapshot_file: snapshot_file.into(),
            snapshot_checksum: format_checksum(checksum),
            created_at: Utc::now(),
            format_version: MARKER_FORMAT_VERSION,
        }
    }

    /// Parsed `snapshot_checksum`
    pub fn checksum(&self) -> CheckpointResult<u32> {
        parse_checksum(&self.snapshot_checksum).ok_or_else(|| {
            CheckpointError::corrupt(format!(
                "malformed snapshot checksum '{}'",
                self.snapshot_checksum
            ))
        })
    }

    pub fn to_json(&self) -> CheckpointResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            CheckpointError::failed(format!("Failed to serialize checkpoint marker: {}", e))
        })
    }

    pub fn from_json(json: &str) -> CheckpointResult<Self> {
        let marker: CheckpointMarker = serde_json::from_str(json).map_err(|e| {
            CheckpointError::corrupt(format!("Failed to parse checkpoint marker: {}", e))
        })?;
        if marker.format_version != MARKER_FORMAT_VERSION {
            return Err(CheckpointError::corrupt(format!(
                "unsupported marker format version {}",
                marker.format_version
            )));
        }
        Ok(marker)
    }

    /// Writes the marker through a temporary file and rename, so readers
    /// see either the previous marker or this one.
    pub fn write_to_file(&self, path: &Path) -> CheckpointResult<()> {
        let json = self.to_json()?;
        persist_file(path, json.as_bytes())
    }

    pub fn read_from_file(path: &Path) -> CheckpointResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CheckpointError::failed_with_source(
                format!("Failed to read marker file: {}", path.display()),
                e,
            )
        })?;
        Self::from_json(&contents)
    }

    /// Reads the marker if one exists
    pub fn load(path: &Path) -> CheckpointResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::read_from_file(path).map(Some)
    }
}

/// Directory holding snapshots and the marker
pub fn checkpoint_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("checkpoint")
}

pub fn marker_path(data_dir: &Path) -> PathBuf {
    checkpoint_dir(data_dir).join("checkpoint.json")
}

/// Format: `crc32:XXXXXXXX` (lowercase hex, zero-padded)
pub fn format_checksum(checksum: u32) -> String {
    format!("crc32:{:08x}", checksum)
}

pub fn parse_checksum(formatted: &str) -> Option<u32> {
    let stripped = formatted.strip_prefix("crc32:")?;
    if stripped.len() != 8 {
        return None;
    }
    u32::from_str_radix(stripped, 16).ok()
}
