//! Engine error taxonomy
//!
//! Every failure surfaced by the engine maps to exactly one [`ErrorKind`].
//! Subsystem errors (WAL, checkpoint, content store) convert into [`Error`]
//! at the façade boundary.
//!
//! Error codes:
//! - AERO_NOT_FOUND
//! - AERO_TXN_CONFLICT
//! - AERO_TXN_INVALID_STATE
//! - AERO_WAL_CORRUPTION
//! - AERO_IO_FAILURE
//! - AERO_CONFIG_INVALID
//! - AERO_INVALID_ARGUMENT

use std::fmt;
use std::io;

use thiserror::Error;

use crate::checkpoint::{CheckpointError, CheckpointErrorCode};
use crate::content::{ContentAddress, ContentError};
use crate::mvcc::{TxnId, TxnState};
use crate::wal::{WalError, WalErrorCode};

/// Coarse error classification consumed by service layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key or content address absent
    NotFound,
    /// Write-write validation failure at commit
    Conflict,
    /// Operation on a non-active transaction or a closed engine
    InvalidState,
    /// WAL or checkpoint framing/checksum failure
    CorruptLog,
    /// Underlying storage unavailable
    IoFailure,
    /// Configuration rejected at load or open
    InvalidConfig,
    /// Request rejected before any state changed
    InvalidArgument,
}

impl ErrorKind {
    /// Returns the stable code string for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "AERO_NOT_FOUND",
            ErrorKind::Conflict => "AERO_TXN_CONFLICT",
            ErrorKind::InvalidState => "AERO_TXN_INVALID_STATE",
            ErrorKind::CorruptLog => "AERO_WAL_CORRUPTION",
            ErrorKind::IoFailure => "AERO_IO_FAILURE",
            ErrorKind::InvalidConfig => "AERO_CONFIG_INVALID",
            ErrorKind::InvalidArgument => "AERO_INVALID_ARGUMENT",
        }
    }

    /// Returns whether the caller may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Engine error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("content not found: {0}")]
    ContentNotFound(ContentAddress),

    #[error("write conflict on transaction {txn}: key {key:?} committed at a later version")]
    Conflict { txn: TxnId, key: Vec<u8> },

    #[error("transaction {txn} is {state}, expected active")]
    InvalidTxnState { txn: TxnId, state: TxnState },

    #[error("engine is closed")]
    Closed,

    #[error("log corruption: {0}")]
    CorruptLog(String),

    #[error("I/O failure: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("entry too large: key {key_len} bytes + value {value_len} bytes exceeds {limit}")]
    EntryTooLarge {
        key_len: usize,
        value_len: usize,
        limit: usize,
    },
}

impl Error {
    /// Classifies this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContentNotFound(_) => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::InvalidTxnState { .. } | Error::Closed => ErrorKind::InvalidState,
            Error::CorruptLog(_) => ErrorKind::CorruptLog,
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::Config(_) => ErrorKind::InvalidConfig,
            Error::EntryTooLarge { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// Returns the stable code string
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub(crate) fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl From<WalError> for Error {
    fn from(err: WalError) -> Self {
        match err.code() {
            WalErrorCode::AeroWalCorruption => Error::CorruptLog(err.to_string()),
            WalErrorCode::AeroWalIoFailed
            | WalErrorCode::AeroWalAppendFailed
            | WalErrorCode::AeroWalFsyncFailed
            | WalErrorCode::AeroWalPoisoned => Error::Io {
                message: err.to_string(),
                source: None,
            },
        }
    }
}

impl From<CheckpointError> for Error {
    fn from(err: CheckpointError) -> Self {
        match err.code() {
            CheckpointErrorCode::AeroCheckpointCorrupt => Error::CorruptLog(err.to_string()),
            CheckpointErrorCode::AeroCheckpointFailed => Error::Io {
                message: err.to_string(),
                source: None,
            },
        }
    }
}

impl From<ContentError> for Error {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(address) => Error::ContentNotFound(address),
            ContentError::DigestMismatch { .. } => Error::CorruptLog(err.to_string()),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
