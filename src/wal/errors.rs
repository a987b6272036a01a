//! Replication log error types
//!
//! Error codes:
//! - REPLICHAT_LOG_APPEND_FAILED (ERROR severity)
//! - REPLICHAT_LOG_FSYNC_FAILED (FATAL severity)
//! - REPLICHAT_LOG_CORRUPTION (FATAL severity)
//! - REPLICHAT_LOG_OUT_OF_ORDER (ERROR severity)
//! - REPLICHAT_LOG_NOT_RETAINED (ERROR severity)
//! - REPLICHAT_SNAPSHOT_FAILED (ERROR severity)

use std::fmt;
use std::io;

/// Severity levels for log errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, node continues
    Error,
    /// Node must stop serving writes
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Log-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    /// Write to the log file failed
    AppendFailed,
    /// fsync after write failed
    FsyncFailed,
    /// Checksum or structure failure while reading
    Corruption,
    /// Entry does not extend the log by exactly one
    OutOfOrder,
    /// Requested range was compacted into a snapshot
    NotRetained,
    /// Snapshot could not be written or read
    SnapshotFailed,
}

impl WalErrorCode {
    /// Stable string code
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::AppendFailed => "REPLICHAT_LOG_APPEND_FAILED",
            WalErrorCode::FsyncFailed => "REPLICHAT_LOG_FSYNC_FAILED",
            WalErrorCode::Corruption => "REPLICHAT_LOG_CORRUPTION",
            WalErrorCode::OutOfOrder => "REPLICHAT_LOG_OUT_OF_ORDER",
            WalErrorCode::NotRetained => "REPLICHAT_LOG_NOT_RETAINED",
            WalErrorCode::SnapshotFailed => "REPLICHAT_SNAPSHOT_FAILED",
        }
    }

    /// Severity for this code
    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::FsyncFailed | WalErrorCode::Corruption => Severity::Fatal,
            WalErrorCode::AppendFailed
            | WalErrorCode::OutOfOrder
            | WalErrorCode::NotRetained
            | WalErrorCode::SnapshotFailed => Severity::Error,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Log error with context
#[derive(Debug)]
pub struct WalError {
    code: WalErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl WalError {
    fn new(code: WalErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Write to the log file failed
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(WalErrorCode::AppendFailed, message)
        }
    }

    /// fsync failed; the entry may or may not be on disk
    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(WalErrorCode::FsyncFailed, message)
        }
    }

    /// Log contents are unreadable
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(WalErrorCode::Corruption, message)
    }

    /// Corruption with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("byte_offset: {}", offset)),
            ..Self::new(WalErrorCode::Corruption, reason)
        }
    }

    /// Entry sequence is not `last + 1`
    pub fn out_of_order(expected: u64, got: u64) -> Self {
        Self {
            details: Some(format!("expected: {}, got: {}", expected, got)),
            ..Self::new(WalErrorCode::OutOfOrder, "entry does not extend the log")
        }
    }

    /// Range before the snapshot boundary was requested
    pub fn not_retained(after: u64, first_retained: u64) -> Self {
        Self {
            details: Some(format!("after: {}, first_retained: {}", after, first_retained)),
            ..Self::new(WalErrorCode::NotRetained, "requested entries were compacted")
        }
    }

    /// Snapshot I/O or encoding failed
    pub fn snapshot_failed(message: impl Into<String>) -> Self {
        Self::new(WalErrorCode::SnapshotFailed, message)
    }

    pub fn code(&self) -> WalErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for log operations
pub type WalResult<T> = Result<T, WalError>;
