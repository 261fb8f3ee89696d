//! WAL error types
//!
//! Error codes:
//! - AERO_WAL_IO_FAILED (ERROR severity, log file could not be opened or read)
//! - AERO_WAL_APPEND_FAILED (ERROR severity, append rolled back)
//! - AERO_WAL_FSYNC_FAILED (ERROR severity, append rolled back)
//! - AERO_WAL_POISONED (FATAL severity, rollback itself failed)
//! - AERO_WAL_CORRUPTION (FATAL severity)

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The failed operation had no effect on the log
    Error,
    /// The log can no longer accept writes or cannot be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    AeroWalIoFailed,
    AeroWalAppendFailed,
    AeroWalFsyncFailed,
    AeroWalPoisoned,
    AeroWalCorruption,
}

impl WalErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::AeroWalIoFailed => "AERO_WAL_IO_FAILED",
            WalErrorCode::AeroWalAppendFailed => "AERO_WAL_APPEND_FAILED",
            WalErrorCode::AeroWalFsyncFailed => "AERO_WAL_FSYNC_FAILED",
            WalErrorCode::AeroWalPoisoned => "AERO_WAL_POISONED",
            WalErrorCode::AeroWalCorruption => "AERO_WAL_CORRUPTION",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::AeroWalIoFailed
            | WalErrorCode::AeroWalAppendFailed
            | WalErrorCode::AeroWalFsyncFailed => Severity::Error,
            WalErrorCode::AeroWalPoisoned | WalErrorCode::AeroWalCorruption => Severity::Fatal,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Where in the log a corruption was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalPosition {
    Sequence(u64),
    Offset(u64),
}

impl fmt::Display for WalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalPosition::Sequence(seq) => write!(f, "sequence_number: {}", seq),
            WalPosition::Offset(offset) => write!(f, "byte_offset: {}", offset),
        }
    }
}

#[derive(Debug)]
pub struct WalError {
    code: WalErrorCode,
    message: String,
    position: Option<WalPosition>,
    source: Option<io::Error>,
}

impl WalError {
    fn build(code: WalErrorCode, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code,
            message: message.into(),
            position: None,
            source,
        }
    }

    /// Opening or reading the log failed at the storage layer
    pub fn io_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::build(WalErrorCode::AeroWalIoFailed, message, Some(source))
    }

    /// Write or truncate failed; the log was restored to its prior length
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::build(WalErrorCode::AeroWalAppendFailed, message, Some(source))
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self::build(WalErrorCode::AeroWalFsyncFailed, message, Some(source))
    }

    /// Append refused because an earlier rollback failed
    pub fn poisoned(message: impl Into<String>) -> Self {
        Self::build(WalErrorCode::AeroWalPoisoned, message, None)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::build(WalErrorCode::AeroWalCorruption, message, None)
    }

    pub fn corruption_at_sequence(sequence: u64, reason: impl Into<String>) -> Self {
        Self::corruption(reason).at(WalPosition::Sequence(sequence))
    }

    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self::corruption(reason).at(WalPosition::Offset(offset))
    }

    fn at(mut self, position: WalPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn code(&self) -> WalErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<WalPosition> {
        self.position
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        match self.position {
            Some(position) => write!(f, " ({})", position),
            None => Ok(()),
        }
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type WalResult<T> = Result<T, WalError>;
