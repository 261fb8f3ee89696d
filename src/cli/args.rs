//! CLI argument definitions using clap
//!
//! Commands:
//! - aerokv init
//! - aerokv put <key> <value>
//! - aerokv get <key>
//! - aerokv delete <key>
//! - aerokv scan [--start <key>] [--end <key>] [--limit <n>]
//! - aerokv stats | health | flush | gc

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerokv - a crash-consistent MVCC key-value store
#[derive(Parser, Debug)]
#[command(name = "aerokv")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default ./aerokv.json)
    #[arg(long, global = true, conflicts_with = "data_dir")]
    pub config: Option<PathBuf>,

    /// Data directory, opened with default settings and warn-level logging
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Initialize a new data directory
    Init,

    /// Bind a key to a value
    Put { key: String, value: String },

    /// Print the current value of a key
    Get { key: String },

    /// Delete a key
    Delete { key: String },

    /// List keys in order
    Scan {
        /// Inclusive lower bound
        #[arg(long)]
        start: Option<String>,

        /// Exclusive upper bound
        #[arg(long)]
        end: Option<String>,

        /// Maximum number of pairs to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print engine statistics
    Stats,

    /// Print component health
    Health,

    /// Checkpoint and truncate the WAL
    Flush,

    /// Prune versions no reader can see
    Gc,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
