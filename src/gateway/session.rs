//! Client sessions
//!
//! A session lives exactly as long as its connection, on the node serving
//! it. It is never replicated; a failover ends every session.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::state::{AccountRef, ChatError};

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub remote: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    account: Option<AccountRef>,
}

impl Session {
    pub fn new(remote: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote,
            connected_at: Utc::now(),
            account: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.account.as_ref().map(|a| a.username.as_str())
    }

    pub fn account(&self) -> Option<&AccountRef> {
        self.account.as_ref()
    }

    /// Logged-in account, or `NotLoggedIn`.
    pub fn require_account(&self) -> Result<&AccountRef, ChatError> {
        self.account.as_ref().ok_or(ChatError::NotLoggedIn)
    }

    pub fn login(&mut self, account: AccountRef) {
        self.account = Some(account);
    }

    pub fn logout(&mut self) -> Option<AccountRef> {
        self.account.take()
    }
}
