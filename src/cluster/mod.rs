//! Cluster configuration and membership
//!
//! Membership is fixed at startup: the set of nodes, their addresses and the
//! node that starts as Master on a fresh cluster.

mod config;
mod view;

pub use config::{ClusterConfig, ConfigError, ConfigResult, NodeConfig, NodeId};
pub use view::ClusterView;
