//! Replication channel
//!
//! Moves log entries from the Master to every Replica over TCP.
//!
//! - Entries are streamed in sequence order and applied exactly once
//! - A replica only applies the entry right after its own last sequence
//! - Gaps are closed by backfill; unusable histories by a full snapshot
//! - The Master learns each replica's true position from its heartbeats

mod codec;
mod cursor;
mod errors;
mod message;
mod receiver;
mod transport;

pub use codec::{decode_body, encode_frame, read_frame, write_frame, MAX_FRAME_LEN};
pub use cursor::{LogPosition, PeerCursor, ReplicaCursors, SyncDecision};
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult};
pub use message::PeerMessage;
pub use receiver::{classify, ReceiveResult};
pub use transport::{
    PeerAddress, Transport, TransportConfig, TransportError, TransportHandle, TransportResult,
};
