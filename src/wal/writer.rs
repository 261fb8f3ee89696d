//! WAL writer
//!
//! One commit is one `write_all` of its framed mutation records followed by
//! its COMMIT record. In `every_commit` mode the write is followed by fsync
//! before the commit is acknowledged; in `on_flush` mode fsync is deferred
//! to [`WalWriter::fsync`].
//!
//! A failed write or fsync is rolled back by truncating the file to its
//! pre-append length. If the rollback also fails the writer is poisoned and
//! refuses every later append.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::errors::{WalError, WalResult};
use super::reader::ReplayedLog;
use super::record::{encode_record, length_prefix, WalOperation};
use crate::config::WalSyncMode;
use crate::crash_point::{maybe_crash, points};
use crate::mvcc::Version;

/// Location of the log inside a data directory
pub fn wal_path(data_dir: &Path) -> PathBuf {
    data_dir.join("wal").join("wal.log")
}

/// Append-only WAL writer.
pub struct WalWriter {
    wal_path: PathBuf,
    file: File,
    /// Next sequence number to assign (starts at 1)
    next_sequence: u64,
    /// Length of the file covering every successful append
    len: u64,
    sync_mode: WalSyncMode,
    /// Appended bytes not yet covered by an fsync
    unsynced: bool,
    poisoned: bool,
}

impl WalWriter {
    /// Opens `<data_dir>/wal/wal.log`, discarding any torn tail.
    pub fn open(data_dir: &Path, sync_mode: WalSyncMode) -> WalResult<Self> {
        let log = ReplayedLog::read(&wal_path(data_dir))?;
        Self::resume(data_dir, sync_mode, &log)
    }

    /// Opens the log for appending after `log` was replayed from it.
    ///
    /// The file is truncated to the durable prefix so that new commits are
    /// appended directly after the last complete one.
    pub fn resume(data_dir: &Path, sync_mode: WalSyncMode, log: &ReplayedLog) -> WalResult<Self> {
        let wal_path = wal_path(data_dir);
        let wal_dir = data_dir.join("wal");

        fs::create_dir_all(&wal_dir).map_err(|e| {
            WalError::append_failed(
                format!("failed to create WAL directory: {}", wal_dir.display()),
                e,
            )
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .map_err(|e| {
                WalError::append_failed(
                    format!("failed to open WAL file: {}", wal_path.display()),
                    e,
                )
            })?;

        let file_len = file
            .metadata()
            .map_err(|e| WalError::append_failed("failed to read WAL metadata", e))?
            .len();

        if file_len > log.durable_len {
            file.set_len(log.durable_len).map_err(|e| {
                WalError::append_failed(
                    format!("failed to truncate WAL tail to {} bytes", log.durable_len),
                    e,
                )
            })?;
            file.sync_all()
                .map_err(|e| WalError::fsync_failed("fsync failed after WAL tail truncation", e))?;
        }

        Ok(Self {
            wal_path,
            file,
            next_sequence: log.last_sequence + 1,
            len: log.durable_len,
            sync_mode,
            unsynced: false,
            poisoned: false,
        })
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &Path {
        &self.wal_path
    }

    /// Returns the next sequence number that will be assigned.
    pub fn next_sequence_number(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the last assigned sequence number, or 0 if no records written.
    pub fn last_sequence_number(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Bytes currently in the log
    pub fn size_bytes(&self) -> u64 {
        self.len
    }

    pub fn sync_mode(&self) -> WalSyncMode {
        self.sync_mode
    }

    /// Returns true once a failed append could not be rolled back
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns true if the log file is still present on disk
    pub fn is_reachable(&self) -> bool {
        fs::metadata(&self.wal_path).is_ok()
    }

    /// Appends one commit: every mutation record followed by the COMMIT
    /// record, all carrying `version`.
    ///
    /// Returns the number of bytes appended.
    ///
    /// # Errors
    ///
    /// - `AERO_WAL_POISONED` if an earlier failure could not be rolled back
    /// - `AERO_WAL_APPEND_FAILED` if a record does not fit its u32 length
    ///   fields (nothing written) or the write fails (rolled back)
    /// - `AERO_WAL_FSYNC_FAILED` if fsync fails (rolled back)
    pub fn append_commit(&mut self, version: Version, writes: &[WalOperation]) -> WalResult<u64> {
        if self.poisoned {
            return Err(WalError::poisoned(format!(
                "WAL writer poisoned, refusing commit {}",
                version
            )));
        }

        let (buf, seq) = self.frame_commit(version, writes).map_err(|e| {
            WalError::append_failed(format!("commit {} does not fit WAL framing", version), e)
        })?;

        if let Err(e) = self.file.write_all(&buf) {
            self.rollback();
            return Err(WalError::append_failed(
                format!("failed to write commit {} to WAL", version),
                e,
            ));
        }

        maybe_crash(points::WAL_AFTER_WRITE);

        match self.sync_mode {
            WalSyncMode::EveryCommit => {
                if let Err(e) = self.file.sync_all() {
                    self.rollback();
                    return Err(WalError::fsync_failed(
                        format!("fsync failed after WAL append of commit {}", version),
                        e,
                    ));
                }
            }
            WalSyncMode::OnFlush => self.unsynced = true,
        }

        self.next_sequence = seq;
        self.len += buf.len() as u64;
        Ok(buf.len() as u64)
    }

    /// Encodes every mutation and the COMMIT marker. Returns the buffer and
    /// the sequence number following the marker.
    fn frame_commit(
        &self,
        version: Version,
        writes: &[WalOperation],
    ) -> io::Result<(Vec<u8>, u64)> {
        let mut seq = self.next_sequence;
        let mut buf = Vec::new();
        for op in writes {
            encode_record(seq, version, op, &mut buf)?;
            seq += 1;
        }
        let marker = WalOperation::Commit {
            write_count: u32::from_le_bytes(length_prefix(writes.len())?),
        };
        encode_record(seq, version, &marker, &mut buf)?;
        Ok((buf, seq + 1))
    }

    /// Restore the file to the length before the failed append.
    fn rollback(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|_| self.file.sync_all());
        if restored.is_err() {
            self.poisoned = true;
        }
    }

    /// Explicitly fsync the WAL file.
    pub fn fsync(&mut self) -> WalResult<()> {
        self.file
            .sync_all()
            .map_err(|e| WalError::fsync_failed("explicit WAL fsync failed", e))?;
        self.unsynced = false;
        Ok(())
    }

    /// Returns true if appended bytes await an fsync
    pub fn has_unsynced(&self) -> bool {
        self.unsynced
    }

    /// Truncate the log to zero after a checkpoint; sequence numbers
    /// restart at 1.
    pub fn truncate(&mut self) -> WalResult<()> {
        self.file.set_len(0).map_err(|e| {
            WalError::append_failed(
                format!("failed to truncate WAL file: {}", self.wal_path.display()),
                e,
            )
        })?;
        self.file
            .sync_all()
            .map_err(|e| WalError::fsync_failed("fsync failed after WAL truncation", e))?;

        self.len = 0;
        self.next_sequence = 1;
        self.unsynced = false;
        self.poisoned = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentAddress;
    use crate::wal::WalErrorCode;
    use tempfile::TempDir;

    fn put(key: &str, value: &str) -> WalOperation {
        WalOperation::Put {
            key: key.as_bytes().to_vec(),
            address: ContentAddress::of(value.as_bytes()),
            value: value.as_bytes().to_vec(),
        }
    }

    fn open(dir: &TempDir) -> WalWriter {
        WalWriter::open(dir.path(), WalSyncMode::EveryCommit).unwrap()
    }

    #[test]
    fn test_writer_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let wal_dir = temp_dir.path().join("wal");
        assert!(!wal_dir.exists());

        let _writer = open(&temp_dir);

        assert!(wal_dir.exists());
        assert!(wal_dir.join("wal.log").exists());
    }

    #[test]
    fn test_sequence_numbers_start_at_one() {
        let temp_dir = TempDir::new().unwrap();
        let writer = open(&temp_dir);

        assert_eq!(writer.next_sequence_number(), 1);
        assert_eq!(writer.last_sequence_number(), 0);
        assert_eq!(writer.size_bytes(), 0);
    }

    #[test]
    fn test_commit_consumes_one_sequence_per_record() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = open(&temp_dir);

        writer
            .append_commit(Version::new(1), &[put("a", "1"), put("b", "2")])
            .unwrap();
        assert_eq!(writer.last_sequence_number(), 3);

        writer.append_commit(Version::new(2), &[put("c", "3")]).unwrap();
        assert_eq!(writer.last_sequence_number(), 5);
    }

    #[test]
    fn test_size_tracks_file_length() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = open(&temp_dir);

        let appended = writer.append_commit(Version::new(1), &[put("a", "1")]).unwrap();
        let on_disk = fs::metadata(writer.path()).unwrap().len();
        assert_eq!(appended, on_disk);
        assert_eq!(writer.size_bytes(), on_disk);
    }

    #[test]
    fn test_writer_reopens_with_correct_sequence() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut writer = open(&temp_dir);
            writer.append_commit(Version::new(1), &[put("a", "1")]).unwrap();
            writer.append_commit(Version::new(2), &[put("b", "2")]).unwrap();
        }

        let writer = open(&temp_dir);
        assert_eq!(writer.next_sequence_number(), 5);
    }

    #[test]
    fn test_reopen_discards_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let durable;
        {
            let mut writer = open(&temp_dir);
            writer.append_commit(Version::new(1), &[put("a", "1")]).unwrap();
            durable = writer.size_bytes();
            writer.append_commit(Version::new(2), &[put("b", "2")]).unwrap();
        }

        let path = wal_path(temp_dir.path());
        let full = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 2).unwrap();
        drop(file);

        let mut writer = open(&temp_dir);
        assert_eq!(writer.size_bytes(), durable);
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);

        writer.append_commit(Version::new(2), &[put("c", "3")]).unwrap();
        let log = ReplayedLog::read(&path).unwrap();
        assert_eq!(log.commits.len(), 2);
        assert!(log.tail_error.is_none());
    }

    #[test]
    fn test_truncate_resets_log() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = open(&temp_dir);

        writer.append_commit(Version::new(1), &[put("a", "1")]).unwrap();
        writer.truncate().unwrap();

        assert_eq!(writer.size_bytes(), 0);
        assert_eq!(writer.next_sequence_number(), 1);
        assert_eq!(fs::metadata(writer.path()).unwrap().len(), 0);

        writer.append_commit(Version::new(2), &[put("b", "2")]).unwrap();
        let log = ReplayedLog::read(writer.path()).unwrap();
        assert_eq!(log.commits.len(), 1);
        assert_eq!(log.commits[0].version, Version::new(2));
    }

    #[test]
    fn test_on_flush_defers_fsync() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = WalWriter::open(temp_dir.path(), WalSyncMode::OnFlush).unwrap();

        writer.append_commit(Version::new(1), &[put("a", "1")]).unwrap();
        assert!(writer.has_unsynced());

        writer.fsync().unwrap();
        assert!(!writer.has_unsynced());
    }

    #[test]
    fn test_empty_commit_writes_marker_only() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = open(&temp_dir);

        writer.append_commit(Version::new(1), &[]).unwrap();
        let log = ReplayedLog::read(writer.path()).unwrap();
        assert_eq!(log.commits.len(), 1);
        assert!(log.commits[0].writes.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_append_without_rollback_poisons_writer() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("wal")).unwrap();
        // Every write to /dev/full fails with ENOSPC and set_len cannot
        // restore its length.
        std::os::unix::fs::symlink("/dev/full", wal_path(temp_dir.path())).unwrap();
        let mut writer = open(&temp_dir);

        let err = writer
            .append_commit(Version::new(1), &[put("a", "1")])
            .unwrap_err();
        assert_eq!(err.code(), WalErrorCode::AeroWalAppendFailed);
        assert!(writer.is_poisoned());
        assert_eq!(writer.size_bytes(), 0);
        assert_eq!(writer.next_sequence_number(), 1);

        let err = writer
            .append_commit(Version::new(1), &[put("b", "2")])
            .unwrap_err();
        assert_eq!(err.code(), WalErrorCode::AeroWalPoisoned);
        assert!(err.is_fatal());
    }
}
