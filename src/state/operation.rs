//! Logged write operations and the outcomes they produce.
//!
//! An `Operation` is what travels through the replication log. Everything that
//! is not a pure function of prior state (timestamps, password salts, the
//! configured listing order) is resolved by the Master before the operation is
//! logged and is carried inside it.

use serde::{Deserialize, Serialize};

use super::types::{MessageId, MessageOrder};

/// A state-changing operation, in the form it is logged and replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateAccount {
        username: String,
        password_hash: String,
    },
    Login {
        username: String,
    },
    Logout {
        username: String,
    },
    /// Session lost without an explicit logout
    Disconnect {
        username: String,
    },
    DeleteAccount {
        username: String,
    },
    SendMessage {
        sender: String,
        recipient: String,
        body: String,
        sent_at_ms: i64,
    },
    GetUndelivered {
        username: String,
        count: usize,
        order: MessageOrder,
    },
    DeleteMessages {
        username: String,
        ids: Vec<MessageId>,
    },
    /// First entry of every new Master epoch: all sessions died with the old Master.
    ResetPresence,
}

impl Operation {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateAccount { .. } => "create_account",
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::Disconnect { .. } => "disconnect",
            Self::DeleteAccount { .. } => "delete_account",
            Self::SendMessage { .. } => "send_message",
            Self::GetUndelivered { .. } => "get_undelivered",
            Self::DeleteMessages { .. } => "delete_messages",
            Self::ResetPresence => "reset_presence",
        }
    }
}

/// Result of applying an operation.
///
/// Recorded next to the operation in the log when the Master first applies
/// it; replicas compare their own outcome against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    AccountCreated,
    LoggedIn { unread: usize },
    LoggedOut,
    AccountDeleted,
    MessageStored { id: MessageId, delivered: bool },
    Delivered { ids: Vec<MessageId> },
    MessagesDeleted { count: usize },
    PresenceReset { went_offline: usize },
}
