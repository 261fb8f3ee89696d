//! JSON output for the CLI
//!
//! - Success: one JSON object on stdout
//! - Failure: one JSON object on stderr

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });

    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, &response)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

/// Write an error response to stderr
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    });

    let mut stderr = io::stderr().lock();
    serde_json::to_writer(&mut stderr, &response)?;
    writeln!(stderr)?;
    stderr.flush()?;

    Ok(())
}
