//! Command-line interface for aerokv
//!
//! Provides one-shot commands against a data directory:
//! - init: Create the data directory and an empty WAL
//! - put / get / delete / scan: Key-value operations
//! - stats / health: Inspection
//! - flush / gc: Maintenance

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, resolve_config, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
