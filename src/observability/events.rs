//! Observable events
//!
//! Every log line names exactly one of these.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    NodeStart,
    NodeServing,
    NodeShutdown,
    ConfigLoaded,

    // Recovery
    RecoveryStart,
    RecoveryComplete,
    /// Recovery failed (FATAL)
    RecoveryFailed,
    LogTornTail,

    // Replication log
    LogAppend,
    /// Local persistence failed; node stops accepting writes
    LogAppendFailed,
    SnapshotCreated,
    SnapshotInstalled,

    // Role manager
    RoleTransition,
    MasterTimeout,
    EpochAdvanced,
    CatchUpStart,
    CatchUpComplete,

    // Replication channel
    ReplicaGap,
    ReplicaDivergence,
    BackfillRequested,
    BackfillServed,
    SnapshotSent,
    PeerConnected,
    PeerDisconnected,
    PeerFrameRejected,

    // Client gateway
    ClientConnected,
    ClientDisconnected,
    ClientRequest,
    ClientRejected,

    // Admin
    AdminListening,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::NodeStart => "NODE_START",
            Event::NodeServing => "NODE_SERVING",
            Event::NodeShutdown => "NODE_SHUTDOWN",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::RecoveryStart => "RECOVERY_START",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",
            Event::LogTornTail => "LOG_TORN_TAIL",

            Event::LogAppend => "LOG_APPEND",
            Event::LogAppendFailed => "LOG_APPEND_FAILED",
            Event::SnapshotCreated => "SNAPSHOT_CREATED",
            Event::SnapshotInstalled => "SNAPSHOT_INSTALL",

            Event::RoleTransition => "ROLE_TRANSITION",
            Event::MasterTimeout => "MASTER_TIMEOUT",
            Event::EpochAdvanced => "EPOCH_ADVANCED",
            Event::CatchUpStart => "CATCH_UP_START",
            Event::CatchUpComplete => "CATCH_UP_COMPLETE",

            Event::ReplicaGap => "REPLICA_GAP",
            Event::ReplicaDivergence => "REPLICA_DIVERGENCE",
            Event::BackfillRequested => "BACKFILL_REQUESTED",
            Event::BackfillServed => "BACKFILL_SERVED",
            Event::SnapshotSent => "SNAPSHOT_SENT",
            Event::PeerConnected => "PEER_CONNECTED",
            Event::PeerDisconnected => "PEER_DISCONNECTED",
            Event::PeerFrameRejected => "PEER_FRAME_REJECTED",

            Event::ClientConnected => "CLIENT_CONNECTED",
            Event::ClientDisconnected => "CLIENT_DISCONNECTED",
            Event::ClientRequest => "CLIENT_REQUEST",
            Event::ClientRejected => "CLIENT_REJECTED",

            Event::AdminListening => "ADMIN_LISTENING",
        }
    }

    /// Events that mean the node cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::RecoveryFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_screaming_snake() {
        for event in [
            Event::NodeStart,
            Event::RoleTransition,
            Event::ReplicaGap,
            Event::SnapshotInstalled,
            Event::ClientDisconnected,
        ] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_only_recovery_failure_is_fatal() {
        assert!(Event::RecoveryFailed.is_fatal());
        assert!(!Event::LogAppendFailed.is_fatal());
    }
}
