//! CLI module for replichat
//!
//! - init: write a sample cluster configuration
//! - start: recover one node and serve until interrupted
//! - inspect: offline summary of one node's recovered state

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, inspect, run, run_command, start};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
