//! Durability and recovery tests
//!
//! - Acknowledged writes survive restart, with and without a checkpoint
//! - A torn WAL tail recovers to the durable prefix
//! - Checkpoint and WAL replay compose
//! - Identical values are stored once
//! - A failed WAL append fails the commit and publishes nothing

use std::fs::{self, OpenOptions};
use std::path::Path;

use aerokv::mvcc::ENTRY_METADATA_BYTES;
use aerokv::wal::wal_path;
use aerokv::{Engine, EngineConfig, ErrorKind, HealthStatus, TxnState, Version, WalSyncMode};
use tempfile::TempDir;

fn config(dir: &Path) -> EngineConfig {
    EngineConfig::new(dir).with_log_level("error")
}

fn open(dir: &Path) -> Engine {
    Engine::open(config(dir)).expect("open engine")
}

#[test]
fn test_put_then_get() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());

    let version = engine.put(b"user:1", b"alice").unwrap();
    assert_eq!(version, Version::new(1));
    assert_eq!(engine.get(b"user:1").unwrap(), Some(b"alice".to_vec()));
    assert_eq!(engine.get(b"user:2").unwrap(), None);
}

#[test]
fn test_acknowledged_writes_survive_restart_without_flush() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        for i in 0..50u32 {
            engine.put(format!("key{:03}", i).as_bytes(), &i.to_le_bytes()).unwrap();
        }
        engine.delete(b"key007").unwrap();
    }

    let engine = open(dir.path());
    let report = engine.recovery_report();
    assert_eq!(report.checkpoint_version, None);
    assert_eq!(report.replayed_commits, 51);
    assert_eq!(report.recovered_version, Version::new(51));

    assert_eq!(engine.get(b"key000").unwrap(), Some(0u32.to_le_bytes().to_vec()));
    assert_eq!(engine.get(b"key049").unwrap(), Some(49u32.to_le_bytes().to_vec()));
    assert_eq!(engine.get(b"key007").unwrap(), None);
    assert_eq!(engine.stats().key_count, 49);
}

#[test]
fn test_put_flush_restart_get() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"user:1", b"alice").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.stats().wal_bytes, 0);
    }

    let engine = open(dir.path());
    assert_eq!(engine.recovery_report().checkpoint_version, Some(Version::new(1)));
    assert_eq!(engine.recovery_report().replayed_commits, 0);
    assert_eq!(engine.get(b"user:1").unwrap(), Some(b"alice".to_vec()));
}

#[test]
fn test_checkpoint_then_wal_replay() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.flush().unwrap();
        engine.put(b"c", b"3").unwrap();
        engine.delete(b"a").unwrap();
    }

    let engine = open(dir.path());
    let report = engine.recovery_report();
    assert_eq!(report.checkpoint_version, Some(Version::new(2)));
    assert_eq!(report.replayed_commits, 2);
    assert_eq!(report.recovered_version, Version::new(4));

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(b"c").unwrap(), Some(b"3".to_vec()));

    // Versions continue after the recovered high-water mark
    assert_eq!(engine.put(b"d", b"4").unwrap(), Version::new(5));
}

#[test]
fn test_torn_tail_recovers_durable_prefix() {
    let dir = TempDir::new().unwrap();
    let durable_len;
    {
        let engine = open(dir.path());
        engine.put(b"a", b"1").unwrap();
        durable_len = engine.stats().wal_bytes;
        engine.put(b"b", b"2").unwrap();
    }

    let path = wal_path(dir.path());
    let full_len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(full_len - 3)
        .unwrap();

    let engine = open(dir.path());
    let report = engine.recovery_report();
    assert!(report.truncated_tail);
    assert_eq!(report.recovered_version, Version::new(1));
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(fs::metadata(&path).unwrap().len(), durable_len);

    // The cut commit's version is reused by the next commit
    assert_eq!(engine.put(b"b", b"again").unwrap(), Version::new(2));
}

#[test]
fn test_garbage_tail_is_discarded() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"a", b"1").unwrap();
    }
    let path = wal_path(dir.path());
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x11]);
    fs::write(&path, bytes).unwrap();

    let engine = open(dir.path());
    assert!(engine.recovery_report().truncated_tail);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_corrupt_checkpoint_fails_open() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"a", b"1").unwrap();
        engine.flush().unwrap();
    }
    let snapshot = dir.path().join("checkpoint").join("snapshot-1.dat");
    let mut bytes = fs::read(&snapshot).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&snapshot, bytes).unwrap();

    let err = Engine::open(config(dir.path())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::CorruptLog);
}

#[test]
fn test_identical_values_stored_once() {
    let dir = TempDir::new().unwrap();
    let engine = open(dir.path());
    let value = vec![7u8; 4096];

    engine.put(b"k1", &value).unwrap();
    let first = engine.stats();

    engine.put(b"k2", &value).unwrap();
    let second = engine.stats();

    assert_eq!(second.content_blobs, 1);
    assert_eq!(second.content_bytes, first.content_bytes);
    assert_eq!(
        second.approx_size_bytes - first.approx_size_bytes,
        2 + ENTRY_METADATA_BYTES
    );
}

#[test]
fn test_dedup_survives_checkpoint() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"k1", b"shared").unwrap();
        engine.put(b"k2", b"shared").unwrap();
        engine.flush().unwrap();
    }

    let engine = open(dir.path());
    let stats = engine.stats();
    assert_eq!(stats.content_blobs, 1);
    assert_eq!(stats.key_count, 2);
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"shared".to_vec()));
}

#[test]
fn test_on_flush_mode_persists_on_drop() {
    let dir = TempDir::new().unwrap();
    {
        let engine =
            Engine::open(config(dir.path()).with_sync_mode(WalSyncMode::OnFlush)).unwrap();
        engine.put(b"a", b"1").unwrap();
    }

    let engine = open(dir.path());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_close_then_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
        assert_eq!(engine.put(b"b", b"2").unwrap_err().kind(), ErrorKind::InvalidState);
    }

    let engine = open(dir.path());
    assert_eq!(engine.recovery_report().checkpoint_version, Some(Version::new(1)));
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
}

#[cfg(target_os = "linux")]
#[test]
fn test_wal_write_failure_fails_commit_without_publishing() {
    let dir = TempDir::new().unwrap();
    let wal = wal_path(dir.path());
    fs::create_dir_all(wal.parent().unwrap()).unwrap();
    // Writes to /dev/full fail with ENOSPC and its length cannot be reset,
    // so the failed append is not rolled back either.
    std::os::unix::fs::symlink("/dev/full", &wal).unwrap();
    let engine = open(dir.path());

    let err = engine.put(b"a", b"1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert_eq!(engine.current_version(), Version::ZERO);
    assert_eq!(engine.get(b"a").unwrap(), None);

    let mut txn = engine.begin().unwrap();
    engine.write(&mut txn, b"b", b"2").unwrap();
    let err = engine.commit(&mut txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert_eq!(txn.state(), TxnState::Aborted);
    assert_eq!(engine.get(b"b").unwrap(), None);

    let stats = engine.stats();
    assert_eq!(stats.current_version, Version::ZERO);
    assert_eq!(stats.key_count, 0);
    assert_eq!(stats.metrics.commits, 0);
    assert_eq!(stats.metrics.aborts, 1);

    assert_eq!(
        engine.health_check().status,
        HealthStatus::Degraded {
            reasons: vec!["wal: writer poisoned after a failed rollback".to_string()]
        }
    );
}
