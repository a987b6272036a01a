//! Replication error types
//!
//! Error codes:
//! - REPLICHAT_REPLICATION_GAP (ERROR): entry arrived ahead of the local log
//! - REPLICHAT_REPLICATION_DIVERGENCE (FATAL for the stream, resync required)
//! - REPLICHAT_REPLICATION_STALE_EPOCH (ERROR)
//! - REPLICHAT_REPLICATION_NOT_RETAINED (ERROR): requested range was compacted
//! - REPLICHAT_REPLICATION_CODEC (ERROR)
//! - REPLICHAT_REPLICATION_PERSISTENCE (FATAL)

use std::fmt;

use crate::wal::{WalError, WalErrorCode};

/// Replication error type
#[derive(Debug, Clone)]
pub struct ReplicationError {
    pub kind: ReplicationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Missing entries between the local log and an incoming entry
    Gap,
    /// Local history disagrees with the Master's
    Divergence,
    /// Message from a Master of an older epoch
    StaleEpoch,
    /// Requested entries were compacted into a snapshot
    NotRetained,
    /// Frame could not be encoded or decoded
    Codec,
    /// Local log or snapshot write failed
    Persistence,
}

impl ReplicationErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ReplicationErrorKind::Gap => "REPLICHAT_REPLICATION_GAP",
            ReplicationErrorKind::Divergence => "REPLICHAT_REPLICATION_DIVERGENCE",
            ReplicationErrorKind::StaleEpoch => "REPLICHAT_REPLICATION_STALE_EPOCH",
            ReplicationErrorKind::NotRetained => "REPLICHAT_REPLICATION_NOT_RETAINED",
            ReplicationErrorKind::Codec => "REPLICHAT_REPLICATION_CODEC",
            ReplicationErrorKind::Persistence => "REPLICHAT_REPLICATION_PERSISTENCE",
        }
    }
}

impl ReplicationError {
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn gap(expected: u64, received: u64) -> Self {
        Self::new(
            ReplicationErrorKind::Gap,
            format!("expected sequence {}, received {}", expected, received),
        )
    }

    pub fn divergence(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Divergence, message)
    }

    pub fn stale_epoch(local: u64, received: u64) -> Self {
        Self::new(
            ReplicationErrorKind::StaleEpoch,
            format!("local epoch {}, received {}", local, received),
        )
    }

    pub fn not_retained(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::NotRetained, message)
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Codec, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::Persistence, message)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Fatal errors stop the stream until the replica resyncs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::Divergence | ReplicationErrorKind::Persistence
        )
    }
}

impl From<WalError> for ReplicationError {
    fn from(err: WalError) -> Self {
        match err.code() {
            WalErrorCode::NotRetained => ReplicationError::not_retained(err.message()),
            _ => ReplicationError::persistence(err.to_string()),
        }
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for ReplicationError {}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
