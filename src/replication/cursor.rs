//! Per-replica send cursors on the Master
//!
//! For every replica the Master tracks what it has sent and what the
//! replica has acknowledged. Heartbeats carry the replica's true position
//! and resynchronize the cursor:
//!
//! - position known to the Master with the same epoch: stream from there
//! - unknown position (compacted, ahead, or different epoch): send a snapshot
//!
//! Acknowledgments only move forward.

use std::collections::BTreeMap;

use serde::Serialize;

use super::errors::{ReplicationError, ReplicationResult};
use crate::cluster::NodeId;
use crate::wal::ReplicationLog;

/// Heartbeats to wait for a replica to install a snapshot before resending it.
const SNAPSHOT_PATIENCE: u32 = 3;

/// Log positions needed to match a replica against local history.
pub trait LogPosition {
    fn last_sequence(&self) -> u64;
    fn last_epoch(&self) -> u64;
    /// Epoch of the entry at `sequence`, `None` if unknown here.
    fn epoch_at(&self, sequence: u64) -> Option<u64>;
}

impl LogPosition for ReplicationLog {
    fn last_sequence(&self) -> u64 {
        ReplicationLog::last_sequence(self)
    }

    fn last_epoch(&self) -> u64 {
        ReplicationLog::last_epoch(self)
    }

    fn epoch_at(&self, sequence: u64) -> Option<u64> {
        ReplicationLog::epoch_at(self, sequence)
    }
}

/// What the Master should do for a replica after its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Send entries after the cursor
    Stream,
    /// Replica history is unusable; send the full snapshot
    Snapshot,
    /// Nothing to send right now
    Wait,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerCursor {
    /// Highest sequence the replica has durably applied
    pub acked: u64,
    /// Highest sequence handed to the transport
    pub sent: u64,
    /// Cursor is anchored to a position both sides agree on
    pub synced: bool,
    #[serde(skip)]
    last_report: Option<u64>,
    #[serde(skip)]
    snapshot_wait: u32,
}

#[derive(Debug, Default)]
pub struct ReplicaCursors {
    cursors: BTreeMap<NodeId, PeerCursor>,
}

impl ReplicaCursors {
    pub fn new(peers: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            cursors: peers
                .into_iter()
                .map(|id| (id, PeerCursor::default()))
                .collect(),
        }
    }

    /// Forget all positions. Used whenever this node (re)gains mastership.
    pub fn reset(&mut self) {
        for cursor in self.cursors.values_mut() {
            *cursor = PeerCursor::default();
        }
    }

    pub fn get(&self, peer: NodeId) -> Option<&PeerCursor> {
        self.cursors.get(&peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PeerCursor)> {
        self.cursors.iter().map(|(id, c)| (*id, c))
    }

    /// Match a replica's reported position against local history.
    pub fn on_heartbeat<L: LogPosition>(
        &mut self,
        peer: NodeId,
        last_sequence: u64,
        last_epoch: u64,
        log: &L,
    ) -> SyncDecision {
        let Some(cursor) = self.cursors.get_mut(&peer) else {
            return SyncDecision::Wait;
        };

        let known = last_sequence <= log.last_sequence()
            && log.epoch_at(last_sequence) == Some(last_epoch);

        if !known {
            cursor.synced = false;
            cursor.last_report = Some(last_sequence);
            if cursor.snapshot_wait > 0 {
                cursor.snapshot_wait -= 1;
                return SyncDecision::Wait;
            }
            return SyncDecision::Snapshot;
        }

        let stalled = cursor.last_report == Some(last_sequence) && last_sequence < cursor.sent;
        if !cursor.synced || last_sequence > cursor.sent || stalled {
            // Anything past the replica's position may have been lost in flight.
            cursor.sent = last_sequence;
        }
        cursor.synced = true;
        cursor.snapshot_wait = 0;
        cursor.acked = cursor.acked.max(last_sequence);
        cursor.last_report = Some(last_sequence);

        if cursor.sent < log.last_sequence() {
            SyncDecision::Stream
        } else {
            SyncDecision::Wait
        }
    }

    /// Record an acknowledgment. Must not go backwards or past what was sent.
    pub fn on_ack(&mut self, peer: NodeId, sequence: u64) -> ReplicationResult<()> {
        let cursor = self
            .cursors
            .get_mut(&peer)
            .ok_or_else(|| ReplicationError::divergence(format!("ack from unknown node {}", peer)))?;

        if !cursor.synced {
            return Ok(());
        }
        if sequence < cursor.acked {
            return Err(ReplicationError::divergence(format!(
                "node {} acknowledged {} after {}",
                peer, sequence, cursor.acked
            )));
        }
        if sequence > cursor.sent {
            return Err(ReplicationError::divergence(format!(
                "node {} acknowledged {} but only {} was sent",
                peer, sequence, cursor.sent
            )));
        }
        cursor.acked = sequence;
        Ok(())
    }

    /// Position to stream after, if the replica is synced and behind.
    pub fn next_after(&self, peer: NodeId, log_last: u64) -> Option<u64> {
        self.cursors
            .get(&peer)
            .filter(|c| c.synced && c.sent < log_last)
            .map(|c| c.sent)
    }

    pub fn mark_sent(&mut self, peer: NodeId, through: u64) {
        if let Some(cursor) = self.cursors.get_mut(&peer) {
            cursor.sent = cursor.sent.max(through);
        }
    }

    /// A snapshot is on its way; stop streaming until the replica reports
    /// a position we recognize.
    pub fn mark_snapshot_sent(&mut self, peer: NodeId) {
        if let Some(cursor) = self.cursors.get_mut(&peer) {
            cursor.synced = false;
            cursor.snapshot_wait = SNAPSHOT_PATIENCE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Entries 1..=n with the given epochs; sequences before `first` are compacted.
    struct FakeLog {
        first: u64,
        epochs: Vec<u64>,
    }

    impl LogPosition for FakeLog {
        fn last_sequence(&self) -> u64 {
            self.epochs.len() as u64
        }

        fn last_epoch(&self) -> u64 {
            self.epochs.last().copied().unwrap_or(0)
        }

        fn epoch_at(&self, sequence: u64) -> Option<u64> {
            if sequence == 0 {
                return Some(0);
            }
            if sequence + 1 < self.first {
                return None;
            }
            self.epochs.get(sequence as usize - 1).copied()
        }
    }

    fn log(epochs: &[u64]) -> FakeLog {
        FakeLog {
            first: 1,
            epochs: epochs.to_vec(),
        }
    }

    #[test]
    fn test_matching_replica_streams_from_its_position() {
        let log = log(&[1, 1, 1, 1]);
        let mut cursors = ReplicaCursors::new([2, 3]);

        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Stream);
        assert_eq!(cursors.next_after(2, 4), Some(2));
        assert_eq!(cursors.get(2).unwrap().acked, 2);
    }

    #[test]
    fn test_caught_up_replica_waits() {
        let log = log(&[1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Wait);
        assert_eq!(cursors.next_after(2, 2), None);
    }

    #[test]
    fn test_epoch_mismatch_needs_snapshot() {
        let log = log(&[1, 2, 2]);
        let mut cursors = ReplicaCursors::new([2]);
        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Snapshot);
    }

    #[test]
    fn test_replica_ahead_needs_snapshot() {
        let log = log(&[1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        assert_eq!(cursors.on_heartbeat(2, 5, 1, &log), SyncDecision::Snapshot);
    }

    #[test]
    fn test_compacted_position_needs_snapshot() {
        let log = FakeLog {
            first: 6,
            epochs: vec![1; 8],
        };
        let mut cursors = ReplicaCursors::new([2]);
        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Snapshot);
    }

    #[test]
    fn test_snapshot_not_resent_immediately() {
        let log = log(&[1, 2]);
        let mut cursors = ReplicaCursors::new([2]);
        assert_eq!(cursors.on_heartbeat(2, 1, 3, &log), SyncDecision::Snapshot);
        cursors.mark_snapshot_sent(2);

        for _ in 0..SNAPSHOT_PATIENCE {
            assert_eq!(cursors.on_heartbeat(2, 1, 3, &log), SyncDecision::Wait);
        }
        assert_eq!(cursors.on_heartbeat(2, 1, 3, &log), SyncDecision::Snapshot);
    }

    #[test]
    fn test_ack_must_be_monotonic() {
        let log = log(&[1, 1, 1, 1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        cursors.on_heartbeat(2, 0, 0, &log);
        cursors.mark_sent(2, 5);

        assert!(cursors.on_ack(2, 3).is_ok());
        assert!(cursors.on_ack(2, 2).is_err());
        assert!(cursors.on_ack(2, 5).is_ok());
    }

    #[test]
    fn test_ack_cannot_exceed_sent() {
        let log = log(&[1, 1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        cursors.on_heartbeat(2, 0, 0, &log);
        cursors.mark_sent(2, 2);
        assert!(cursors.on_ack(2, 3).is_err());
    }

    #[test]
    fn test_stalled_replica_is_resent() {
        let log = log(&[1, 1, 1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        cursors.on_heartbeat(2, 1, 1, &log);
        cursors.mark_sent(2, 4);

        // Progress not yet visible: keep the cursor.
        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Wait);
        // Same position twice in a row: the batch was lost.
        assert_eq!(cursors.on_heartbeat(2, 2, 1, &log), SyncDecision::Stream);
        assert_eq!(cursors.next_after(2, 4), Some(2));
    }

    #[test]
    fn test_reset_requires_new_heartbeat() {
        let log = log(&[1, 1]);
        let mut cursors = ReplicaCursors::new([2]);
        cursors.on_heartbeat(2, 0, 0, &log);
        cursors.reset();
        assert_eq!(cursors.next_after(2, 2), None);
    }
}
