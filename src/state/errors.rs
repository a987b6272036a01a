//! # Chat Errors
//!
//! Validation failures produced by the state machine and the credential
//! checks that guard it. These are reported to the client as-is and are never
//! retried by the core.

use thiserror::Error;

/// Result type for state machine operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Username is already taken
    #[error("Username already exists")]
    DuplicateAccount,

    /// Unknown username or wrong password (deliberately indistinguishable)
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Message addressed to an account that does not exist
    #[error("Recipient not found")]
    UnknownRecipient,

    /// Operation names an account that does not exist
    #[error("Account not found")]
    UnknownAccount,

    /// Operation requires a logged-in session
    #[error("Not logged in")]
    NotLoggedIn,

    /// Password rejected by the configured policy
    #[error("Password does not meet requirements: {0}")]
    WeakPassword(String),

    /// Malformed request fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Password hash could not be computed
    #[error("Password hashing failed")]
    HashingFailed,
}

impl ChatError {
    /// Stable, machine-readable name sent alongside the reply text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateAccount => "DuplicateAccount",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::UnknownRecipient => "UnknownRecipient",
            Self::UnknownAccount => "UnknownAccount",
            Self::NotLoggedIn => "NotLoggedIn",
            Self::WeakPassword(_) => "WeakPassword",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::HashingFailed => "HashingFailed",
        }
    }
}
