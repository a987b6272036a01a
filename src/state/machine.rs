//! The chat state machine.
//!
//! `ChatState::apply` is a pure function of (prior state, operation): no
//! clocks, no randomness, no I/O. Replaying the same log from an empty state
//! therefore yields the same state on every node. Containers are ordered maps
//! so the canonical encoding (`to_canonical_bytes`) is byte-for-byte stable.
//!
//! Validation happens before any mutation, so a rejected operation leaves the
//! state untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::{ChatError, ChatResult};
use super::operation::{Operation, Outcome};
use super::pattern::AccountPattern;
use super::types::{
    Account, AccountId, AccountRef, AccountSummary, Message, MessageId, MessageOrder,
};

/// In-memory accounts and messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    accounts: BTreeMap<String, Account>,
    messages: BTreeMap<MessageId, Message>,
    next_message_id: MessageId,
    next_account_id: AccountId,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    /// Empty state. Message and account ids start at 1.
    pub fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            messages: BTreeMap::new(),
            next_message_id: 1,
            next_account_id: 1,
        }
    }

    // =========================================================================
    // WRITE PATH
    // =========================================================================

    /// Check whether `op` would be accepted, without mutating anything.
    ///
    /// The Master calls this before appending to the log so that rejected
    /// operations never become log entries.
    pub fn validate(&self, op: &Operation) -> ChatResult<()> {
        match op {
            Operation::CreateAccount { username, password_hash } => {
                if username.trim().is_empty() {
                    return Err(ChatError::InvalidRequest("username is required".into()));
                }
                if password_hash.is_empty() {
                    return Err(ChatError::InvalidRequest("password is required".into()));
                }
                if self.accounts.contains_key(username) {
                    return Err(ChatError::DuplicateAccount);
                }
                Ok(())
            }
            Operation::Login { username } | Operation::DeleteAccount { username } => {
                if !self.accounts.contains_key(username) {
                    return Err(ChatError::InvalidCredentials);
                }
                Ok(())
            }
            Operation::Logout { username } => {
                if !self.accounts.contains_key(username) {
                    return Err(ChatError::UnknownAccount);
                }
                Ok(())
            }
            Operation::SendMessage { sender, recipient, .. } => {
                if !self.accounts.contains_key(sender) {
                    return Err(ChatError::UnknownAccount);
                }
                if !self.accounts.contains_key(recipient) {
                    return Err(ChatError::UnknownRecipient);
                }
                Ok(())
            }
            Operation::Disconnect { .. }
            | Operation::GetUndelivered { .. }
            | Operation::DeleteMessages { .. }
            | Operation::ResetPresence => Ok(()),
        }
    }

    /// Apply one operation, returning its outcome.
    pub fn apply(&mut self, op: &Operation) -> ChatResult<Outcome> {
        self.validate(op)?;

        let outcome = match op {
            Operation::CreateAccount { username, password_hash } => {
                let id = self.next_account_id;
                self.next_account_id += 1;
                self.accounts.insert(
                    username.clone(),
                    Account::new(id, username.clone(), password_hash.clone()),
                );
                Outcome::AccountCreated
            }
            Operation::Login { username } => {
                if let Some(account) = self.accounts.get_mut(username) {
                    account.online = true;
                }
                Outcome::LoggedIn {
                    unread: self.undelivered_count(username),
                }
            }
            Operation::Logout { username } | Operation::Disconnect { username } => {
                if let Some(account) = self.accounts.get_mut(username) {
                    account.online = false;
                }
                Outcome::LoggedOut
            }
            Operation::DeleteAccount { username } => {
                // Messages sent by or to the account are kept.
                self.accounts.remove(username);
                Outcome::AccountDeleted
            }
            Operation::SendMessage {
                sender,
                recipient,
                body,
                sent_at_ms,
            } => {
                let id = self.next_message_id;
                self.next_message_id += 1;

                let delivered = self
                    .accounts
                    .get(recipient)
                    .map(|a| a.online)
                    .unwrap_or(false);

                self.messages.insert(
                    id,
                    Message {
                        id,
                        sender: sender.clone(),
                        recipient: recipient.clone(),
                        body: body.clone(),
                        created_at_ms: *sent_at_ms,
                        delivered,
                        read: false,
                    },
                );
                Outcome::MessageStored { id, delivered }
            }
            Operation::GetUndelivered { username, count, order } => {
                let mut pending: Vec<Message> = self
                    .messages
                    .values()
                    .filter(|m| m.recipient == *username && !m.delivered)
                    .cloned()
                    .collect();
                order.sort(&mut pending);

                let ids: Vec<MessageId> = pending.iter().take(*count).map(|m| m.id).collect();
                for id in &ids {
                    if let Some(message) = self.messages.get_mut(id) {
                        message.delivered = true;
                        message.read = true;
                    }
                }
                Outcome::Delivered { ids }
            }
            Operation::DeleteMessages { username, ids } => {
                let mut count = 0;
                for id in ids {
                    let owned = self
                        .messages
                        .get(id)
                        .map(|m| m.recipient == *username)
                        .unwrap_or(false);
                    if owned {
                        self.messages.remove(id);
                        count += 1;
                    }
                }
                Outcome::MessagesDeleted { count }
            }
            Operation::ResetPresence => {
                let mut went_offline = 0;
                for account in self.accounts.values_mut() {
                    if account.online {
                        account.online = false;
                        went_offline += 1;
                    }
                }
                Outcome::PresenceReset { went_offline }
            }
        };

        Ok(outcome)
    }

    /// Functional form of [`apply`](Self::apply): returns the successor state
    /// and the reply, leaving `self` untouched.
    pub fn applied(&self, op: &Operation) -> (Self, ChatResult<Outcome>) {
        let mut next = self.clone();
        let result = next.apply(op);
        (next, result)
    }

    // =========================================================================
    // READ PATH
    // =========================================================================

    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.get(username)
    }

    /// True while `account` still names the same live account.
    pub fn resolves(&self, account: &AccountRef) -> bool {
        self.accounts
            .get(&account.username)
            .map(|a| a.id == account.id)
            .unwrap_or(false)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn next_message_id(&self) -> MessageId {
        self.next_message_id
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Number of messages waiting for `username`.
    pub fn undelivered_count(&self, username: &str) -> usize {
        self.messages
            .values()
            .filter(|m| m.recipient == username && !m.delivered)
            .count()
    }

    /// Up to `count` already-delivered messages for `username`.
    pub fn delivered_messages(
        &self,
        username: &str,
        count: usize,
        order: MessageOrder,
    ) -> Vec<Message> {
        let mut out: Vec<Message> = self
            .messages
            .values()
            .filter(|m| m.recipient == username && m.delivered)
            .cloned()
            .collect();
        order.sort(&mut out);
        out.truncate(count);
        out
    }

    /// Messages by id, in the order the ids are given. Missing ids are skipped.
    pub fn messages_by_id(&self, ids: &[MessageId]) -> Vec<Message> {
        ids.iter().filter_map(|id| self.messages.get(id).cloned()).collect()
    }

    /// Accounts matching `pattern`, sorted by username.
    pub fn list_accounts(&self, pattern: &AccountPattern) -> Vec<AccountSummary> {
        self.accounts
            .values()
            .filter(|a| pattern.matches(&a.username))
            .map(Account::summary)
            .collect()
    }

    /// Canonical encoding used to compare states across nodes.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        // Serializing ordered maps of plain data cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
