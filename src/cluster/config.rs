//! Cluster configuration
//!
//! One JSON file, read once at startup and never reloaded. Every node of a
//! cluster is started with the same file and its own `--node-id`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{MessageOrder, PasswordPolicy};

/// Static identity of a cluster member.
pub type NodeId = u32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One configured node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Host or IP the node binds and is reached on
    pub address: String,
    /// Client-facing port
    pub port: u16,
    /// Inter-node replication port
    pub peer_port: u16,
    /// HTTP status port
    pub admin_port: u16,
}

impl NodeConfig {
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.address, self.peer_port)
    }

    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.address, self.admin_port)
    }
}

/// Cluster configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeConfig>,

    /// Node that starts as Master on a fresh cluster
    pub initial_master: NodeId,

    /// Each node keeps its data in `<data_dir>/node-<id>/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Consecutive missed heartbeats before a Replica suspects the Master
    #[serde(default = "default_missed_heartbeats")]
    pub missed_heartbeats: u32,

    /// Order of GetMessages / GetUndelivered results
    #[serde(default)]
    pub message_order: MessageOrder,

    /// Retained entries that trigger a snapshot
    #[serde(default = "default_compact_after_entries")]
    pub compact_after_entries: usize,

    /// Maximum entries per Entries or BackfillResponse message
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch: usize,

    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Require at least one digit and one uppercase letter in passwords
    #[serde(default)]
    pub require_digit_and_uppercase: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_heartbeat_interval_ms() -> u64 {
    500
}
fn default_missed_heartbeats() -> u32 {
    3
}
fn default_compact_after_entries() -> usize {
    10_000
}
fn default_backfill_batch() -> usize {
    256
}
fn default_min_password_length() -> usize {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ClusterConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: ClusterConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Invalid("at least one node is required".into()));
        }

        let mut ids = HashSet::new();
        let mut endpoints = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.node_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate node_id {}",
                    node.node_id
                )));
            }
            for port in [node.port, node.peer_port, node.admin_port] {
                if !endpoints.insert((node.address.clone(), port)) {
                    return Err(ConfigError::Invalid(format!(
                        "port {} on {} is used twice",
                        port, node.address
                    )));
                }
            }
        }

        if !ids.contains(&self.initial_master) {
            return Err(ConfigError::Invalid(format!(
                "initial_master {} is not a configured node",
                self.initial_master
            )));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be > 0".into()));
        }
        if self.missed_heartbeats == 0 {
            return Err(ConfigError::Invalid("missed_heartbeats must be >= 1".into()));
        }
        if self.backfill_batch == 0 {
            return Err(ConfigError::Invalid("backfill_batch must be > 0".into()));
        }
        if self.compact_after_entries == 0 {
            return Err(ConfigError::Invalid("compact_after_entries must be > 0".into()));
        }
        if self.log_level.parse::<crate::observability::Severity>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log_level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Data directory of one node.
    pub fn node_dir(&self, node_id: NodeId) -> PathBuf {
        self.data_dir.join(format!("node-{}", node_id))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which the Master is presumed dead.
    pub fn failure_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.missed_heartbeats
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy {
            min_length: self.min_password_length,
            require_digit_and_uppercase: self.require_digit_and_uppercase,
        }
    }

    /// Three loopback nodes, node 1 as initial Master.
    pub fn sample(data_dir: impl Into<PathBuf>) -> Self {
        let nodes = (1..=3)
            .map(|i: u16| NodeConfig {
                node_id: NodeId::from(i),
                address: "127.0.0.1".to_string(),
                port: 7000 + i,
                peer_port: 7100 + i,
                admin_port: 7200 + i,
            })
            .collect();

        Self {
            nodes,
            initial_master: 1,
            data_dir: data_dir.into(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            missed_heartbeats: default_missed_heartbeats(),
            message_order: MessageOrder::default(),
            compact_after_entries: default_compact_after_entries(),
            backfill_batch: default_backfill_batch(),
            min_password_length: default_min_password_length(),
            require_digit_and_uppercase: false,
            log_level: default_log_level(),
        }
    }
}
