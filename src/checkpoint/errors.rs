//! Checkpoint error types
//!
//! - AERO_CHECKPOINT_FAILED: a checkpoint could not be written; the
//!   previous checkpoint and the WAL are intact
//! - AERO_CHECKPOINT_CORRUPT: a persisted checkpoint fails validation
//!
//! Checkpoint errors are ERROR severity. A failed checkpoint never
//! corrupts serving state.

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed but system is healthy
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointErrorCode {
    /// Writing, renaming or truncating failed
    AeroCheckpointFailed,
    /// Marker or snapshot file does not validate
    AeroCheckpointCorrupt,
}

impl CheckpointErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointErrorCode::AeroCheckpointFailed => "AERO_CHECKPOINT_FAILED",
            CheckpointErrorCode::AeroCheckpointCorrupt => "AERO_CHECKPOINT_CORRUPT",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for CheckpointErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Checkpoint error with full context
#[derive(Debug)]
pub struct CheckpointError {
    code: CheckpointErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl CheckpointError {
    fn new(
        code: CheckpointErrorCode,
        message: impl Into<String>,
        source: Option<io::Error>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(CheckpointErrorCode::AeroCheckpointFailed, message, None)
    }

    pub fn failed_with_source(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(
            CheckpointErrorCode::AeroCheckpointFailed,
            message,
            Some(source),
        )
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(CheckpointErrorCode::AeroCheckpointCorrupt, message, None)
    }

    pub fn code(&self) -> CheckpointErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn is_fatal(&self) -> bool {
        false
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code,
            self.message
        )?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

impl From<crate::wal::WalError> for CheckpointError {
    fn from(err: crate::wal::WalError) -> Self {
        CheckpointError::failed(format!("WAL operation failed: {}", err))
    }
}
