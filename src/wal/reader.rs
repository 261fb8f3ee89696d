//! WAL reader and replay
//!
//! Replay reads records strictly in sequence order and groups mutation
//! records into commits closed by their COMMIT record. The first record
//! that is incomplete, fails its checksum, or breaks the sequence ends the
//! durable prefix. Mutation records after the last COMMIT record belong to
//! an in-flight commit and are discarded.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use super::errors::{WalError, WalErrorCode, WalResult};
use super::record::{WalOperation, WalRecord, RECORD_OVERHEAD};
use crate::mvcc::Version;

/// WAL reader for sequential replay.
pub struct WalReader {
    wal_path: PathBuf,
    reader: BufReader<File>,
    current_offset: u64,
    file_size: u64,
    last_sequence: u64,
}

impl WalReader {
    /// Opens a WAL file for reading.
    pub fn open(wal_path: &Path) -> WalResult<Self> {
        let file = File::open(wal_path).map_err(|e| {
            WalError::io_failed(
                format!("failed to open WAL file {}", wal_path.display()),
                e,
            )
        })?;

        let file_size = file
            .metadata()
            .map_err(|e| WalError::io_failed("failed to read WAL metadata", e))?
            .len();

        Ok(Self {
            wal_path: wal_path.to_path_buf(),
            reader: BufReader::new(file),
            current_offset: 0,
            file_size,
            last_sequence: 0,
        })
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &Path {
        &self.wal_path
    }

    /// Returns the byte offset just past the last record read.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// Returns the last successfully read sequence number.
    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence
    }

    /// Reads the next record from the WAL.
    ///
    /// - `Ok(Some(record))` if a record was successfully read
    /// - `Ok(None)` at a clean end of file
    /// - `Err(AERO_WAL_CORRUPTION)` on a truncated record, bad checksum,
    ///   malformed payload or a sequence gap
    ///
    /// After an error the reader position is unspecified; callers stop.
    pub fn read_next(&mut self) -> WalResult<Option<WalRecord>> {
        if self.current_offset >= self.file_size {
            return Ok(None);
        }

        let remaining = self.file_size - self.current_offset;
        if remaining < RECORD_OVERHEAD as u64 {
            return Err(WalError::corruption_at_offset(
                self.current_offset,
                format!(
                    "truncated WAL: {} bytes remaining, minimum record size is {}",
                    remaining, RECORD_OVERHEAD
                ),
            ));
        }

        let mut len_buf = [0u8; 4];
        self.reader
            .read_exact(&mut len_buf)
            .map_err(|e| self.read_failed("record length", e))?;
        let record_length = u32::from_le_bytes(len_buf) as u64;

        if record_length < RECORD_OVERHEAD as u64 {
            return Err(WalError::corruption_at_offset(
                self.current_offset,
                format!("invalid record length: {}", record_length),
            ));
        }
        if record_length > remaining {
            return Err(WalError::corruption_at_offset(
                self.current_offset,
                format!(
                    "record length {} exceeds remaining file size {}",
                    record_length, remaining
                ),
            ));
        }

        let mut record_buf = vec![0u8; record_length as usize];
        record_buf[0..4].copy_from_slice(&len_buf);
        self.reader
            .read_exact(&mut record_buf[4..])
            .map_err(|e| self.read_failed("record body", e))?;

        let (record, consumed) = WalRecord::deserialize(&record_buf)
            .map_err(|e| WalError::corruption_at_offset(self.current_offset, e.to_string()))?;

        let expected = self.last_sequence + 1;
        if record.sequence_number != expected {
            return Err(WalError::corruption_at_sequence(
                record.sequence_number,
                format!(
                    "non-sequential sequence number: expected {}, got {}",
                    expected, record.sequence_number
                ),
            ));
        }

        self.current_offset += consumed as u64;
        self.last_sequence = record.sequence_number;
        Ok(Some(record))
    }

    /// A short read is a torn record; any other read error is the storage
    /// failing underneath an intact log.
    fn read_failed(&self, what: &str, e: io::Error) -> WalError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WalError::corruption_at_offset(
                self.current_offset,
                format!("failed to read {}: {}", what, e),
            )
        } else {
            WalError::io_failed(
                format!("failed to read {} at byte {}", what, self.current_offset),
                e,
            )
        }
    }

    /// Reads the durable prefix of the log.
    ///
    /// Never fails on corrupt content: the corruption is reported in
    /// [`ReplayedLog::tail_error`] and everything from that point on is
    /// excluded from the result. A storage read error fails the replay
    /// instead, so that an unreadable log is never cut back.
    pub fn replay(mut self) -> WalResult<ReplayedLog> {
        let mut log = ReplayedLog::empty();
        let mut pending: Vec<WalOperation> = Vec::new();
        let mut pending_version: Option<Version> = None;

        loop {
            let record = match self.read_next() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) if e.code() == WalErrorCode::AeroWalIoFailed => return Err(e),
                Err(e) => {
                    log.tail_error = Some(e);
                    break;
                }
            };

            if let Some(v) = pending_version {
                if record.version != v {
                    log.tail_error = Some(WalError::corruption_at_sequence(
                        record.sequence_number,
                        format!(
                            "record version {} interleaves open commit {}",
                            record.version, v
                        ),
                    ));
                    break;
                }
            } else if record.version <= log.last_version() {
                log.tail_error = Some(WalError::corruption_at_sequence(
                    record.sequence_number,
                    format!(
                        "commit version {} does not exceed {}",
                        record.version,
                        log.last_version()
                    ),
                ));
                break;
            }

            match record.operation {
                WalOperation::Commit { write_count } => {
                    if write_count as usize != pending.len() {
                        log.tail_error = Some(WalError::corruption_at_sequence(
                            record.sequence_number,
                            format!(
                                "commit marker counts {} writes, found {}",
                                write_count,
                                pending.len()
                            ),
                        ));
                        break;
                    }
                    log.commits.push(ReplayedCommit {
                        version: record.version,
                        writes: std::mem::take(&mut pending),
                    });
                    log.durable_len = self.current_offset;
                    log.last_sequence = record.sequence_number;
                    pending_version = None;
                }
                operation => {
                    pending_version = Some(record.version);
                    pending.push(operation);
                }
            }
        }

        log.discarded_records = pending.len();
        log.file_len = self.file_size;
        Ok(log)
    }
}

/// One complete commit recovered from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedCommit {
    pub version: Version,
    /// Mutation records in log order
    pub writes: Vec<WalOperation>,
}

/// Result of reading the durable prefix of a log file
#[derive(Debug)]
pub struct ReplayedLog {
    pub commits: Vec<ReplayedCommit>,
    /// Byte offset just past the last complete commit
    pub durable_len: u64,
    /// Sequence number of the last durable COMMIT record
    pub last_sequence: u64,
    /// File length at the time of the read
    pub file_len: u64,
    /// Mutation records of an in-flight commit that had no marker
    pub discarded_records: usize,
    /// Corruption that ended the read, if any
    pub tail_error: Option<WalError>,
}

impl ReplayedLog {
    pub(crate) fn empty() -> Self {
        Self {
            commits: Vec::new(),
            durable_len: 0,
            last_sequence: 0,
            file_len: 0,
            discarded_records: 0,
            tail_error: None,
        }
    }

    /// Reads the log at `wal_path`; a missing file is an empty log.
    pub fn read(wal_path: &Path) -> WalResult<Self> {
        match std::fs::metadata(wal_path) {
            Ok(_) => WalReader::open(wal_path)?.replay(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty()),
            Err(e) => Err(WalError::io_failed(
                format!("failed to stat WAL file {}", wal_path.display()),
                e,
            )),
        }
    }

    /// Highest committed version in the durable prefix
    pub fn last_version(&self) -> Version {
        self.commits
            .last()
            .map(|c| c.version)
            .unwrap_or(Version::ZERO)
    }

    /// Returns true when bytes past the durable prefix must be discarded
    pub fn has_torn_tail(&self) -> bool {
        self.file_len > self.durable_len
    }
}
