//! CLI argument definitions using clap
//!
//! Commands:
//! - replichat init --config <path>
//! - replichat start --config <path> --node-id <id>
//! - replichat inspect --config <path> --node-id <id>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cluster::NodeId;

/// replichat - a fault-tolerant, replicated chat service
#[derive(Parser, Debug)]
#[command(name = "replichat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a sample three-node cluster configuration
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./replichat.json")]
        config: PathBuf,
    },

    /// Start one cluster node and serve until Ctrl-C
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./replichat.json")]
        config: PathBuf,

        /// Id of this node in the configuration
        #[arg(long)]
        node_id: NodeId,
    },

    /// Recover a node's state offline and print a summary
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./replichat.json")]
        config: PathBuf,

        #[arg(long)]
        node_id: NodeId,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
