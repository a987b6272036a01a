//! Recovery error types
//!
//! Error codes:
//! - REPLICHAT_LOG_CORRUPTION (FATAL)
//! - REPLICHAT_RECOVERY_DIVERGENCE (FATAL)
//! - REPLICHAT_RECOVERY_REJECTED_ENTRY (FATAL)
//! - REPLICHAT_RECOVERY_FAILED (FATAL)

use std::fmt;

use crate::wal::WalError;

/// Severity levels for recovery errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Node must not serve
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Recovery-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryErrorCode {
    /// Log or snapshot data is unreadable
    LogCorruption,
    /// Replaying an entry produced a different outcome than recorded
    Divergence,
    /// A logged entry was rejected by the state machine
    RejectedEntry,
    /// General failure
    Failed,
}

impl RecoveryErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            RecoveryErrorCode::LogCorruption => "REPLICHAT_LOG_CORRUPTION",
            RecoveryErrorCode::Divergence => "REPLICHAT_RECOVERY_DIVERGENCE",
            RecoveryErrorCode::RejectedEntry => "REPLICHAT_RECOVERY_REJECTED_ENTRY",
            RecoveryErrorCode::Failed => "REPLICHAT_RECOVERY_FAILED",
        }
    }

    /// All recovery errors are fatal
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

impl fmt::Display for RecoveryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Recovery error with the log position it concerns
#[derive(Debug)]
pub struct RecoveryError {
    code: RecoveryErrorCode,
    message: String,
    sequence: Option<u64>,
}

impl RecoveryError {
    pub fn log_corruption(reason: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::LogCorruption,
            message: reason.into(),
            sequence: None,
        }
    }

    pub fn divergence(sequence: u64, reason: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::Divergence,
            message: format!("entry {} diverged: {}", sequence, reason.into()),
            sequence: Some(sequence),
        }
    }

    pub fn rejected_entry(sequence: u64, reason: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::RejectedEntry,
            message: format!("entry {} rejected on replay: {}", sequence, reason.into()),
            sequence: Some(sequence),
        }
    }

    pub fn recovery_failed(reason: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::Failed,
            message: reason.into(),
            sequence: None,
        }
    }

    pub fn code(&self) -> RecoveryErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Sequence of the offending entry, if any
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<WalError> for RecoveryError {
    fn from(err: WalError) -> Self {
        Self::log_corruption(err.to_string())
    }
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for RecoveryError {}

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_carries_sequence() {
        let err = RecoveryError::divergence(17, "outcome mismatch");
        assert_eq!(err.sequence(), Some(17));
        assert_eq!(err.code().code(), "REPLICHAT_RECOVERY_DIVERGENCE");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_wal_error_converts_to_corruption() {
        let err: RecoveryError = WalError::corruption("bad checksum").into();
        assert_eq!(err.code(), RecoveryErrorCode::LogCorruption);
        assert!(err.to_string().contains("bad checksum"));
    }
}
