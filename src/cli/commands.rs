//! CLI command implementations
//!
//! `start` builds a multi-thread tokio runtime, starts the node and blocks
//! until Ctrl-C. `init` and `inspect` never open a socket.

use std::fs;
use std::path::Path;

use serde_json::json;

use crate::cluster::{ClusterConfig, NodeId};
use crate::node::Node;
use crate::observability::{Event, Logger, Severity};
use crate::recovery::RecoveryManager;
use crate::role::DurableMarker;
use crate::state::AccountPattern;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Parse arguments and run the selected command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Start { config, node_id } => start(&config, node_id),
        Command::Inspect { config, node_id } => inspect(&config, node_id),
    }
}

/// Write a sample three-node loopback cluster file.
pub fn init(config_path: &Path) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::already_initialized(config_path));
    }

    let data_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("data");
    let config = ClusterConfig::sample(data_dir);
    let content = serde_json::to_string_pretty(&config)?;
    fs::write(config_path, content)?;

    write_response(json!({
        "config": config_path.display().to_string(),
        "nodes": config.nodes.len(),
        "initial_master": config.initial_master,
    }))
}

fn load_config(config_path: &Path) -> CliResult<ClusterConfig> {
    let config = ClusterConfig::load(config_path)?;
    let severity: Severity = config
        .log_level
        .parse()
        .map_err(CliError::config_error)?;
    Logger::set_min_severity(severity);
    Logger::info(
        Event::ConfigLoaded,
        &[
            ("path", &config_path.display().to_string()),
            ("nodes", &config.nodes.len().to_string()),
            ("heartbeat_interval_ms", &config.heartbeat_interval_ms.to_string()),
        ],
    );
    Ok(config)
}

/// Start one node and serve until interrupted.
pub fn start(config_path: &Path, node_id: NodeId) -> CliResult<()> {
    let config = load_config(config_path)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let node = Node::start(&config, node_id).await?;
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| CliError::io_error(format!("Failed to wait for Ctrl-C: {}", e)))?;
        node.shutdown().await;
        Ok(())
    })
}

/// Recover a node's state without joining the cluster and print a summary.
pub fn inspect(config_path: &Path, node_id: NodeId) -> CliResult<()> {
    let config = load_config(config_path)?;
    if config.node(node_id).is_none() {
        return Err(CliError::config_error(format!(
            "node {} is not in the cluster configuration",
            node_id
        )));
    }

    let node_dir = config.node_dir(node_id);
    let recovered = RecoveryManager::new(&node_dir).recover()?;
    let marker = DurableMarker::new(&node_dir)
        .read()
        .map_err(|e| CliError::io_error(e.to_string()))?;

    let everyone = AccountPattern::compile("").map_err(|e| CliError::io_error(e.to_string()))?;
    let accounts: Vec<_> = recovered
        .state
        .list_accounts(&everyone)
        .into_iter()
        .map(|a| a.username)
        .collect();

    write_response(json!({
        "node_id": node_id,
        "last_sequence": recovered.log.last_sequence(),
        "last_epoch": recovered.log.last_epoch(),
        "snapshot_sequence": recovered.snapshot_sequence,
        "entries_replayed": recovered.stats.entries_replayed,
        "truncated_tail": recovered.truncated_tail,
        "marker_epoch": marker.map(|m| m.epoch),
        "marker_master": marker.and_then(|m| m.master_id),
        "accounts": accounts,
        "messages": recovered.state.message_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.json");

        init(&path).unwrap();

        let config = ClusterConfig::load(&path).unwrap();
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.initial_master, 1);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.json");
        fs::write(&path, "{}").unwrap();

        let err = init(&path).unwrap_err();
        assert_eq!(err.code_str(), "REPLICHAT_CLI_ALREADY_INITIALIZED");
    }

    #[test]
    fn test_inspect_fresh_node() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.json");
        init(&path).unwrap();

        inspect(&path, 2).unwrap();
    }

    #[test]
    fn test_inspect_unknown_node() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.json");
        init(&path).unwrap();

        let err = inspect(&path, 9).unwrap_err();
        assert_eq!(err.code_str(), "REPLICHAT_CLI_CONFIG_ERROR");
    }
}
