//! Observable engine events
//!
//! Events are explicit and typed; each maps to one stable name.

use std::fmt;

use super::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    EngineOpen,
    EngineReady,
    EngineClose,
    ConfigLoaded,

    // Recovery
    RecoveryStart,
    RecoveryComplete,
    RecoveryFailed,
    /// Bytes past the durable prefix of the WAL were discarded
    WalTailTruncated,

    // WAL
    WalFsync,
    WalTruncate,
    /// An append failed and could not be rolled back
    WalPoisoned,

    // Transactions
    TxnConflict,
    CommitFailed,

    // Checkpoint
    CheckpointStart,
    CheckpointComplete,
    CheckpointFailed,
    /// A size-triggered checkpoint failed; the next commit past the
    /// threshold retries it
    CheckpointDeferred,

    // Garbage collection
    GcComplete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EngineOpen => "ENGINE_OPEN",
            Event::EngineReady => "ENGINE_READY",
            Event::EngineClose => "ENGINE_CLOSE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::RecoveryStart => "RECOVERY_START",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",
            Event::WalTailTruncated => "WAL_TAIL_TRUNCATED",
            Event::WalFsync => "WAL_FSYNC",
            Event::WalTruncate => "WAL_TRUNCATE",
            Event::WalPoisoned => "WAL_POISONED",
            Event::TxnConflict => "TXN_CONFLICT",
            Event::CommitFailed => "COMMIT_FAILED",
            Event::CheckpointStart => "CHECKPOINT_START",
            Event::CheckpointComplete => "CHECKPOINT_COMPLETE",
            Event::CheckpointFailed => "CHECKPOINT_FAILED",
            Event::CheckpointDeferred => "CHECKPOINT_DEFERRED",
            Event::GcComplete => "GC_COMPLETE",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::WalPoisoned | Event::RecoveryFailed => Severity::Fatal,
            Event::CommitFailed | Event::CheckpointFailed => Severity::Error,
            Event::WalTailTruncated | Event::TxnConflict | Event::CheckpointDeferred => {
                Severity::Warn
            }
            Event::WalFsync | Event::WalTruncate => Severity::Trace,
            _ => Severity::Info,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
