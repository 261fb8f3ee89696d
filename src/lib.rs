//! aerokv - a crash-consistent, content-addressed MVCC key-value engine
//!
//! Values are stored once per distinct content (SHA-256 addressed), keys
//! live in a copy-on-write B+-tree of version chains, and every commit is
//! durable in a checksummed write-ahead log before it is acknowledged.
//! Transactions read a stable snapshot and commit under
//! first-committer-wins conflict detection.
//!
//! The entry point is [`Engine`].

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod content;
pub mod crash_point;
pub mod engine;
pub mod error;
pub mod index;
pub mod mvcc;
pub mod observability;
pub mod recovery;
pub mod wal;

pub use checkpoint::CheckpointReport;
pub use config::{EngineConfig, WalSyncMode};
pub use content::ContentAddress;
pub use engine::{ComponentHealth, Engine, EngineStats, HealthReport, HealthStatus};
pub use error::{Error, ErrorKind, Result};
pub use mvcc::{GcReport, Transaction, TxnId, TxnState, Version};
pub use recovery::RecoveryReport;
