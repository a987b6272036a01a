//! replichat CLI entry point
//!
//! Parses arguments, dispatches to the CLI module and exits non-zero on
//! failure. Everything else lives in `cli`.

use replichat::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
