//! Write-Ahead Log (WAL) subsystem
//!
//! The WAL is the durability boundary: a commit exists once its COMMIT
//! record is durable in `<data_dir>/wal/wal.log`, and only then.
//!
//! # Invariants Enforced
//!
//! - fsync before acknowledgment (sync mode `every_commit`)
//! - Every record carries a CRC32 over its header and payload
//! - Replay is sequential and stops at the first damaged record
//! - A commit is all of its records or none of them
//! - A failed append never leaves a partial commit behind

mod checksum;
mod errors;
mod reader;
mod record;
mod writer;

pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{Severity, WalError, WalErrorCode, WalPosition, WalResult};
pub use reader::{ReplayedCommit, ReplayedLog, WalReader};
pub use record::{RecordType, WalOperation, WalRecord, MAX_ENTRY_BYTES, RECORD_OVERHEAD};
pub use writer::{wal_path, WalWriter};
