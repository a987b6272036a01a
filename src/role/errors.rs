//! Role manager error types
//!
//! Error codes:
//! - REPLICHAT_ROLE_ILLEGAL_TRANSITION (ERROR)
//! - REPLICHAT_ROLE_MARKER_FAILED (FATAL)

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleErrorKind {
    /// Transition not allowed from the current role
    IllegalTransition,
    /// Epoch marker could not be read or written
    MarkerFailed,
}

impl RoleErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            RoleErrorKind::IllegalTransition => "REPLICHAT_ROLE_ILLEGAL_TRANSITION",
            RoleErrorKind::MarkerFailed => "REPLICHAT_ROLE_MARKER_FAILED",
        }
    }
}

/// Role manager error
#[derive(Debug, Clone)]
pub struct RoleError {
    pub kind: RoleErrorKind,
    pub message: String,
}

impl RoleError {
    pub fn new(kind: RoleErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(RoleErrorKind::IllegalTransition, message)
    }

    pub fn marker_failed(message: impl Into<String>) -> Self {
        Self::new(RoleErrorKind::MarkerFailed, message)
    }

    /// A node that cannot persist its epoch must not claim authority.
    pub fn is_fatal(&self) -> bool {
        self.kind == RoleErrorKind::MarkerFailed
    }
}

impl fmt::Display for RoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for RoleError {}

pub type RoleResult<T> = Result<T, RoleError>;
