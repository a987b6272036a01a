//! Node startup errors

use std::path::PathBuf;

use thiserror::Error;

use crate::cluster::NodeId;
use crate::recovery::RecoveryError;
use crate::replication::TransportError;
use crate::role::RoleError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} is not in the cluster configuration")]
    UnknownNode(NodeId),

    #[error("failed to create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("epoch marker: {0}")]
    Marker(#[from] RoleError),

    #[error("peer transport: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

impl NodeError {
    /// Stable code for the CLI exit message.
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::UnknownNode(_) => "REPLICHAT_NODE_UNKNOWN",
            NodeError::DataDir { .. } => "REPLICHAT_NODE_DATA_DIR",
            NodeError::Recovery(_) => "REPLICHAT_NODE_RECOVERY_FAILED",
            NodeError::Marker(_) => "REPLICHAT_NODE_MARKER_FAILED",
            NodeError::Transport(_) => "REPLICHAT_NODE_TRANSPORT_FAILED",
            NodeError::Bind { .. } => "REPLICHAT_NODE_BIND_FAILED",
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
