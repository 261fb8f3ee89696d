//! Engine configuration
//!
//! Loaded from a JSON file or built in code. Every field except `data_dir`
//! has a default:
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/aerokv",
//!   "wal_sync_mode": "every_commit",
//!   "btree_fanout": 64,
//!   "checkpoint_wal_bytes": 67108864,
//!   "log_level": "info"
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{DEFAULT_FANOUT, MIN_FANOUT};
use crate::observability::Severity;

/// When the WAL is fsynced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalSyncMode {
    /// fsync before every commit is acknowledged
    #[default]
    EveryCommit,
    /// fsync only on flush, checkpoint and close
    OnFlush,
}

impl fmt::Display for WalSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalSyncMode::EveryCommit => write!(f, "every_commit"),
            WalSyncMode::OnFlush => write!(f, "on_flush"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data directory (required)
    pub data_dir: PathBuf,

    #[serde(default)]
    pub wal_sync_mode: WalSyncMode,

    /// Maximum entries per index node (default 64, at least 4)
    #[serde(default = "default_btree_fanout")]
    pub btree_fanout: usize,

    /// WAL size that triggers a checkpoint after commit; 0 disables
    #[serde(default = "default_checkpoint_wal_bytes")]
    pub checkpoint_wal_bytes: u64,

    /// One of trace, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_btree_fanout() -> usize {
    DEFAULT_FANOUT
}

fn default_checkpoint_wal_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            wal_sync_mode: WalSyncMode::default(),
            btree_fanout: default_btree_fanout(),
            checkpoint_wal_bytes: default_checkpoint_wal_bytes(),
            log_level: default_log_level(),
        }
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir must not be empty".into()));
        }

        if self.btree_fanout < MIN_FANOUT {
            return Err(Error::Config(format!(
                "btree_fanout must be at least {}, got {}",
                MIN_FANOUT, self.btree_fanout
            )));
        }

        self.log_severity()?;
        Ok(())
    }

    /// Minimum severity the logger emits
    pub fn log_severity(&self) -> Result<Severity> {
        match self.log_level.parse::<Severity>() {
            Ok(Severity::Fatal) | Err(_) => Err(Error::Config(format!(
                "invalid log_level '{}': expected trace, info, warn or error",
                self.log_level
            ))),
            Ok(severity) => Ok(severity),
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_dir
    }

    pub fn with_sync_mode(mut self, mode: WalSyncMode) -> Self {
        self.wal_sync_mode = mode;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.btree_fanout = fanout;
        self
    }

    pub fn with_checkpoint_wal_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_bytes = bytes;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("/tmp/db");
        assert_eq!(config.wal_sync_mode, WalSyncMode::EveryCommit);
        assert_eq!(config.btree_fanout, 64);
        assert_eq!(config.checkpoint_wal_bytes, 64 * 1024 * 1024);
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_minimal_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aerokv.json");
        fs::write(&path, r#"{"data_dir": "/data"}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config, EngineConfig::new("/data"));
    }

    #[test]
    fn test_load_full_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aerokv.json");
        fs::write(
            &path,
            r#"{
                "data_dir": "/data",
                "wal_sync_mode": "on_flush",
                "btree_fanout": 8,
                "checkpoint_wal_bytes": 0,
                "log_level": "warn"
            }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.wal_sync_mode, WalSyncMode::OnFlush);
        assert_eq!(config.btree_fanout, 8);
        assert_eq!(config.checkpoint_wal_bytes, 0);
        assert_eq!(config.log_severity().unwrap(), Severity::Warn);
    }

    #[test]
    fn test_unknown_sync_mode_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aerokv.json");
        fs::write(&path, r#"{"data_dir": "/data", "wal_sync_mode": "never"}"#).unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_small_fanout_rejected() {
        let err = EngineConfig::new("/data").with_fanout(3).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_bad_log_level_rejected() {
        for level in ["fatal", "loud"] {
            let config = EngineConfig::new("/data").with_log_level(level);
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/aerokv.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
