//! CLI command implementations
//!
//! Every command except `init` opens an existing data directory, runs
//! recovery, performs one operation and prints one JSON response.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::wal::wal_path;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::write_response;

const DEFAULT_CONFIG_PATH: &str = "./aerokv.json";

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let config = resolve_config(cli.config.as_deref(), cli.data_dir.as_deref())?;
    let data = run_command(&config, &cli.command)?;
    write_response(data)
}

/// `--data-dir` wins over a configuration file. Without either, the
/// default configuration path is loaded.
pub fn resolve_config(config: Option<&Path>, data_dir: Option<&Path>) -> CliResult<EngineConfig> {
    if let Some(dir) = data_dir {
        return Ok(EngineConfig::new(dir).with_log_level("warn"));
    }
    let path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    Ok(EngineConfig::load(&path)?)
}

/// Runs `cmd` against the data directory of `config` and returns the
/// response payload.
pub fn run_command(config: &EngineConfig, cmd: &Command) -> CliResult<Value> {
    if let Command::Init = cmd {
        return init(config);
    }
    if !is_initialized(config.data_path()) {
        return Err(CliError::not_initialized());
    }

    let engine = Engine::open(config.clone())?;
    match cmd {
        Command::Init => Err(CliError::already_initialized()),
        Command::Put { key, value } => {
            let version = engine.put(key.as_bytes(), value.as_bytes())?;
            Ok(json!({ "key": key, "version": version }))
        }
        Command::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => Ok(json!({
                "key": key,
                "value": String::from_utf8_lossy(&value),
            })),
            None => Err(CliError::key_not_found(key)),
        },
        Command::Delete { key } => {
            let existed = engine.delete(key.as_bytes())?;
            Ok(json!({ "key": key, "existed": existed }))
        }
        Command::Scan { start, end, limit } => scan(&engine, start.as_deref(), end.as_deref(), *limit),
        Command::Stats => Ok(serde_json::to_value(engine.stats())?),
        Command::Health => Ok(serde_json::to_value(engine.health_check())?),
        Command::Flush => {
            let report = engine.checkpoint()?;
            Ok(serde_json::to_value(report)?)
        }
        Command::Gc => Ok(serde_json::to_value(engine.collect_garbage()?)?),
    }
}

/// Initialize a new data directory
///
/// Creates the WAL and runs an empty recovery. Fails if the directory
/// already holds a WAL.
pub fn init(config: &EngineConfig) -> CliResult<Value> {
    let data_dir = config.data_path();
    if is_initialized(data_dir) {
        return Err(CliError::already_initialized());
    }

    let engine = Engine::open(config.clone())?;
    engine.close()?;

    Ok(json!({
        "initialized": true,
        "data_dir": data_dir.display().to_string(),
    }))
}

fn scan(engine: &Engine, start: Option<&str>, end: Option<&str>, limit: Option<usize>) -> CliResult<Value> {
    let start = start.map_or(Bound::Unbounded, |k| Bound::Included(k.as_bytes()));
    let end = end.map_or(Bound::Unbounded, |k| Bound::Excluded(k.as_bytes()));

    let mut txn = engine.begin()?;
    let pairs = engine.scan(&txn, start, end, limit)?;
    engine.abort(&mut txn)?;

    let items: Vec<Value> = pairs
        .iter()
        .map(|(key, value)| {
            json!({
                "key": String::from_utf8_lossy(key),
                "value": String::from_utf8_lossy(value),
            })
        })
        .collect();
    Ok(json!({ "count": items.len(), "items": items }))
}

fn is_initialized(data_dir: &Path) -> bool {
    wal_path(data_dir).exists()
}
