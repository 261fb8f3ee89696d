//! Crash tests
//!
//! Each test runs the `aerokv` binary with `AEROKV_CRASH_POINT` set so the
//! process aborts mid-operation, then recovers the data directory
//! in-process and checks what survived.
//!
//! - Real filesystem, real process abort
//! - A commit durable in the WAL survives even if its index update never ran
//! - A checkpoint interrupted at any step leaves a recoverable directory

use std::path::Path;
use std::process::{Command, Output};

use aerokv::crash_point::{points, CRASH_POINT_ENV};
use aerokv::{Engine, EngineConfig, Version};
use tempfile::TempDir;

fn aerokv(data_dir: &Path, crash_point: Option<&str>, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_aerokv"));
    cmd.arg("--data-dir").arg(data_dir).args(args);
    match crash_point {
        Some(point) => cmd.env(CRASH_POINT_ENV, point),
        None => cmd.env_remove(CRASH_POINT_ENV),
    };
    cmd.output().expect("failed to run aerokv binary")
}

fn run_ok(data_dir: &Path, args: &[&str]) {
    let output = aerokv(data_dir, None, args);
    assert!(
        output.status.success(),
        "aerokv {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn run_crashing(data_dir: &Path, point: &str, args: &[&str]) {
    let output = aerokv(data_dir, Some(point), args);
    assert!(!output.status.success(), "expected crash at {}", point);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(point),
        "crash point {} not reached: {}",
        point,
        stderr
    );
}

fn recover(data_dir: &Path) -> Engine {
    let engine = Engine::open(EngineConfig::new(data_dir).with_log_level("error"))
        .expect("recovery after crash");
    assert!(engine.health_check().is_healthy());
    engine
}

#[test]
fn test_put_still_works_without_crash_point() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);

    let output = aerokv(dir.path(), None, &["get", "a"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap();
    let json: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["data"]["value"], "1");
}

#[test]
fn test_missing_key_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);

    let output = aerokv(dir.path(), None, &["get", "nope"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("AERO_NOT_FOUND"));
}

#[test]
fn test_crash_after_wal_append_keeps_commit() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_crashing(dir.path(), points::COMMIT_AFTER_WAL, &["put", "b", "2"]);

    let engine = recover(dir.path());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.current_version(), Version::new(2));
}

#[test]
fn test_crash_after_unsynced_write_is_atomic() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_crashing(dir.path(), points::WAL_AFTER_WRITE, &["put", "a", "2"]);

    // The write reached the page cache, so it may or may not survive, but
    // never partially.
    let engine = recover(dir.path());
    let value = engine.get(b"a").unwrap();
    assert!(value == Some(b"1".to_vec()) || value == Some(b"2".to_vec()));
}

#[test]
fn test_crash_at_checkpoint_start() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_crashing(dir.path(), points::CHECKPOINT_START, &["flush"]);

    let engine = recover(dir.path());
    assert_eq!(engine.recovery_report().checkpoint_version, Some(Version::ZERO));
    assert_eq!(engine.recovery_report().replayed_commits, 1);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_crash_before_marker_uses_previous_checkpoint() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_crashing(dir.path(), points::CHECKPOINT_AFTER_SNAPSHOT, &["flush"]);

    let engine = recover(dir.path());
    let report = engine.recovery_report();
    assert_eq!(report.checkpoint_version, Some(Version::ZERO));
    assert_eq!(report.replayed_commits, 1);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_crash_before_wal_truncate_skips_checkpointed_commits() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_ok(dir.path(), &["put", "b", "2"]);
    run_crashing(dir.path(), points::CHECKPOINT_BEFORE_WAL_TRUNCATE, &["flush"]);

    let engine = recover(dir.path());
    let report = engine.recovery_report();
    assert_eq!(report.checkpoint_version, Some(Version::new(2)));
    assert_eq!(report.skipped_commits, 2);
    assert_eq!(report.replayed_commits, 0);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.put(b"c", b"3").unwrap(), Version::new(3));
}

#[test]
fn test_crash_during_recovery_is_repeatable() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["init"]);
    run_ok(dir.path(), &["put", "a", "1"]);
    run_crashing(
        dir.path(),
        points::RECOVERY_AFTER_CHECKPOINT_LOAD,
        &["get", "a"],
    );

    let engine = recover(dir.path());
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}
