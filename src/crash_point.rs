//! Crash point injection for testing durability
//!
//! When `AEROKV_CRASH_POINT` names a point that execution reaches, the
//! process terminates via `std::process::abort()`: no cleanup, no
//! unwinding, no catching.
//!
//! ```bash
//! AEROKV_CRASH_POINT=commit_after_wal aerokv --data-dir /tmp/db put k v
//! ```

use std::sync::OnceLock;

/// Environment variable selecting the crash point
pub const CRASH_POINT_ENV: &str = "AEROKV_CRASH_POINT";

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var(CRASH_POINT_ENV).ok())
        .as_deref()
}

/// Returns true if `AEROKV_CRASH_POINT` equals `name`
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().is_some_and(|p| p == name)
}

/// Abort the process if the named crash point is enabled
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    /// Commit bytes written to the WAL, before fsync
    pub const WAL_AFTER_WRITE: &str = "wal_after_write";
    /// Commit durable in the WAL, index not yet published
    pub const COMMIT_AFTER_WAL: &str = "commit_after_wal";

    pub const CHECKPOINT_START: &str = "checkpoint_start";
    /// Snapshot file renamed into place, marker not yet written
    pub const CHECKPOINT_AFTER_SNAPSHOT: &str = "checkpoint_after_snapshot";
    /// Marker durable, WAL not yet truncated
    pub const CHECKPOINT_BEFORE_WAL_TRUNCATE: &str = "checkpoint_before_wal_truncate";

    pub const RECOVERY_AFTER_CHECKPOINT_LOAD: &str = "recovery_after_checkpoint_load";

    pub fn all() -> &'static [&'static str] {
        &[
            WAL_AFTER_WRITE,
            COMMIT_AFTER_WAL,
            CHECKPOINT_START,
            CHECKPOINT_AFTER_SNAPSHOT,
            CHECKPOINT_BEFORE_WAL_TRUNCATE,
            RECOVERY_AFTER_CHECKPOINT_LOAD,
        ]
    }
}
