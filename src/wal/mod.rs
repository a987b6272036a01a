//! Replication log subsystem
//!
//! The log is the authoritative record of every state change. An operation
//! is acknowledged to a client only after its entry is fsynced here, and
//! every node's state is the replay of its snapshot plus its retained
//! entries.
//!
//! - Sequences start at 1 and grow by exactly one
//! - Every record carries a CRC32 checksum
//! - Corruption halts startup; a torn final record is cut off
//! - Compaction folds the prefix into an atomically written snapshot

mod checksum;
mod errors;
mod log;
mod reader;
mod record;
mod snapshot;
mod writer;

pub use checksum::{checksum, checksum_parts};
pub use errors::{Severity, WalError, WalErrorCode, WalResult};
pub use log::{OpenedLog, ReplicationLog};
pub use reader::LogReader;
pub use record::LogEntry;
pub use snapshot::{SnapshotStore, StateSnapshot};
pub use writer::LogWriter;
