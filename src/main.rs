//! aerokv CLI entry point
//!
//! Parses arguments, runs one command and prints its JSON result. On
//! failure the error is written to stderr and the process exits non-zero.

use aerokv::cli;

fn main() {
    if let Err(e) = cli::run() {
        if cli::write_error(e.code_str(), e.message()).is_err() {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }
}
