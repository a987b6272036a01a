//! replichat - a fault-tolerant, replicated chat service
//!
//! One Master orders every write into a replicated log; Replicas apply the
//! same log and take over when the Master stops sending heartbeats.

pub mod cli;
pub mod cluster;
pub mod gateway;
pub mod node;
pub mod observability;
pub mod recovery;
pub mod replication;
pub mod role;
pub mod shutdown;
pub mod state;
pub mod wal;
