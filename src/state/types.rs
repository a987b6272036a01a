//! Accounts, messages and the views handed back to clients.

use serde::{Deserialize, Serialize};

/// Message identifier, assigned by the state machine in apply order.
pub type MessageId = u64;

/// Account identifier. A username that is deleted and created again gets a
/// new one.
pub type AccountId = u64;

/// A registered user.
///
/// The credential is an Argon2id PHC string; plaintext never reaches the
/// state machine or the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub password_hash: String,
    pub online: bool,
}

impl Account {
    pub fn new(
        id: AccountId,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            password_hash: password_hash.into(),
            online: false,
        }
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            username: self.username.clone(),
            online: self.online,
        }
    }
}

/// A specific account, as bound to a logged-in session.
///
/// Stops resolving once the account is deleted, even if the username is
/// registered again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub username: String,
    pub id: AccountId,
}

impl AccountRef {
    pub fn of(account: &Account) -> Self {
        Self {
            username: account.username.clone(),
            id: account.id,
        }
    }
}

/// Username plus presence, as returned by ListAccounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub username: String,
    pub online: bool,
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    /// Unix millis, fixed by the Master when the message was accepted
    pub created_at_ms: i64,
    pub delivered: bool,
    pub read: bool,
}

/// Order in which message listings are produced.
///
/// Ids are assigned in apply order, so ordering by id is ordering by
/// acceptance on the Master.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

impl MessageOrder {
    /// Sort messages in place according to this order.
    pub fn sort(self, messages: &mut [Message]) {
        match self {
            Self::OldestFirst => messages.sort_by_key(|m| m.id),
            Self::NewestFirst => messages.sort_by(|a, b| b.id.cmp(&a.id)),
        }
    }
}
