//! Inter-node messages
//!
//! Every message names its sender. Replies travel on the sender's own
//! outbound link, never on the connection they arrived on.

use serde::{Deserialize, Serialize};

use crate::cluster::NodeId;
use crate::role::Role;
use crate::wal::{LogEntry, StateSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Periodic liveness and position report, sent by every node
    Heartbeat {
        from: NodeId,
        role: Role,
        current_master: Option<NodeId>,
        epoch: u64,
        last_sequence: u64,
        last_epoch: u64,
    },
    /// Master -> Replica stream, contiguous and ascending
    Entries {
        from: NodeId,
        epoch: u64,
        entries: Vec<LogEntry>,
    },
    /// Highest contiguous sequence durably applied by the sender
    Ack { from: NodeId, sequence: u64 },
    /// Ask for entries after a position the requester holds
    BackfillRequest {
        from: NodeId,
        after_sequence: u64,
        after_epoch: u64,
    },
    BackfillResponse { from: NodeId, entries: Vec<LogEntry> },
    /// Full state, sent when the requested range is gone or histories differ
    Snapshot {
        from: NodeId,
        epoch: u64,
        snapshot: StateSnapshot,
    },
}

impl PeerMessage {
    pub fn from(&self) -> NodeId {
        match self {
            PeerMessage::Heartbeat { from, .. }
            | PeerMessage::Entries { from, .. }
            | PeerMessage::Ack { from, .. }
            | PeerMessage::BackfillRequest { from, .. }
            | PeerMessage::BackfillResponse { from, .. }
            | PeerMessage::Snapshot { from, .. } => *from,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Heartbeat { .. } => "heartbeat",
            PeerMessage::Entries { .. } => "entries",
            PeerMessage::Ack { .. } => "ack",
            PeerMessage::BackfillRequest { .. } => "backfill_request",
            PeerMessage::BackfillResponse { .. } => "backfill_response",
            PeerMessage::Snapshot { .. } => "snapshot",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_wire_shape() {
        let msg = PeerMessage::Heartbeat {
            from: 2,
            role: Role::Replica,
            current_master: Some(1),
            epoch: 1,
            last_sequence: 10,
            last_epoch: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["role"], "replica");
        assert_eq!(json["current_master"], 1);
        assert_eq!(msg.from(), 2);
    }

    #[test]
    fn test_backfill_request_kind() {
        let msg = PeerMessage::BackfillRequest {
            from: 3,
            after_sequence: 4,
            after_epoch: 1,
        };
        assert_eq!(msg.kind(), "backfill_request");
        assert_eq!(msg.from(), 3);
    }
}
