//! Request routing and execution
//!
//! - Replicas and Candidates answer ListAccounts from local state and
//!   redirect everything else to the Master
//! - A Master that is still catching up answers `Unavailable`
//! - On the Master, writes go through the log append path; reads take the
//!   state read lock
//!
//! Passwords are hashed and verified here, on the Master, before anything is
//! logged. Operations only ever carry the hash or just the username.
//!
//! A session is bound to one account, not to a username. Once that account
//! is deleted the session is logged out on its next request, even if the
//! username has been registered again. Presence follows the number of live
//! sessions per account: a user goes offline when the last one ends.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{watch, Mutex};

use super::errors::{GatewayError, GatewayResult};
use super::request::{Reply, Request};
use super::session::Session;
use crate::cluster::ClusterView;
use crate::node::{CoreError, NodeCore};
use crate::role::{Role, RoleView};
use crate::state::{
    hash_password, verify_password, AccountId, AccountPattern, AccountRef, ChatError, ChatState,
    MessageOrder, Operation, Outcome, PasswordPolicy,
};

pub struct Gateway {
    core: Arc<NodeCore>,
    roles: watch::Receiver<RoleView>,
    cluster: Arc<ClusterView>,
    policy: PasswordPolicy,
    order: MessageOrder,
    /// Live sessions per account. Held across presence writes so Login,
    /// Logout and Disconnect for one node are logged in a consistent order.
    presence: Mutex<HashMap<AccountId, usize>>,
}

impl Gateway {
    pub fn new(
        core: Arc<NodeCore>,
        roles: watch::Receiver<RoleView>,
        cluster: Arc<ClusterView>,
        policy: PasswordPolicy,
        order: MessageOrder,
    ) -> Self {
        Self {
            core,
            roles,
            cluster,
            policy,
            order,
            presence: Mutex::new(HashMap::new()),
        }
    }

    pub fn role_view(&self) -> RoleView {
        self.roles.borrow().clone()
    }

    /// Execute one request for `session`. Errors become failure replies.
    pub async fn handle(&self, session: &mut Session, request: Request) -> Reply {
        match self.dispatch(session, request).await {
            Ok(reply) => reply,
            Err(err) => Reply::failure(&err),
        }
    }

    /// Connection closed. The user goes offline if this was their last session.
    pub async fn disconnect(&self, session: &mut Session) {
        let Some(account) = session.logout() else {
            return;
        };
        let mut presence = self.presence.lock().await;
        if !leave(&mut presence, account.id) {
            return;
        }
        // Only the Master can log it; after a failover ResetPresence covers it.
        if self.role_view().accepts_writes() {
            let op = Operation::Disconnect {
                username: account.username.clone(),
            };
            let _ = self.submit(Some(account), op, |_, _| ()).await;
        }
    }

    async fn dispatch(&self, session: &mut Session, request: Request) -> GatewayResult<Reply> {
        if let Request::ListAccounts { pattern } = &request {
            return self.list_accounts(pattern);
        }

        let view = self.role_view();
        if view.role != Role::Master {
            return Err(self.not_master(&view));
        }
        if !view.ready {
            return Err(GatewayError::Unavailable(
                "master is catching up; retry shortly".into(),
            ));
        }

        match request {
            Request::CreateAccount { username, password } => {
                self.create_account(username, password).await
            }
            Request::Login { username, password } => self.login(session, username, password).await,
            Request::Logout => self.logout(session).await,
            Request::DeleteAccount { password } => self.delete_account(session, password).await,
            Request::SendMessage { recipient, message } => {
                let account = self.session_account(session).await?;
                let op = Operation::SendMessage {
                    sender: account.username.clone(),
                    recipient,
                    body: message,
                    sent_at_ms: chrono::Utc::now().timestamp_millis(),
                };
                let payload = self
                    .write_as(session, account, op, |_, outcome| match outcome {
                        Outcome::MessageStored { id, delivered } => {
                            json!({ "id": id, "delivered": delivered })
                        }
                        _ => json!({}),
                    })
                    .await?;
                Ok(Reply::ok("Message sent").with_payload(payload))
            }
            Request::GetUndelivered { count } => {
                let account = self.session_account(session).await?;
                let op = Operation::GetUndelivered {
                    username: account.username.clone(),
                    count,
                    order: self.order,
                };
                let messages = self
                    .write_as(session, account, op, |state, outcome| match outcome {
                        Outcome::Delivered { ids } => state.messages_by_id(ids),
                        _ => Vec::new(),
                    })
                    .await?;
                Ok(Reply::ok(format!("Retrieved {} messages", messages.len()))
                    .with_payload(json!({ "messages": messages })))
            }
            Request::GetMessages { count } => {
                let account = self.session_account(session).await?;
                let order = self.order;
                let messages = self.read(|state| {
                    state
                        .resolves(&account)
                        .then(|| state.delivered_messages(&account.username, count, order))
                })?;
                let Some(messages) = messages else {
                    self.forget(session).await;
                    return Err(ChatError::NotLoggedIn.into());
                };
                Ok(Reply::ok(format!("Retrieved {} messages", messages.len()))
                    .with_payload(json!({ "messages": messages })))
            }
            Request::DeleteMessages { ids } => {
                let account = self.session_account(session).await?;
                let op = Operation::DeleteMessages {
                    username: account.username.clone(),
                    ids,
                };
                let count = self
                    .write_as(session, account, op, |_, outcome| match outcome {
                        Outcome::MessagesDeleted { count } => *count,
                        _ => 0,
                    })
                    .await?;
                Ok(Reply::ok(format!("Deleted {} messages", count))
                    .with_payload(json!({ "count": count })))
            }
            Request::ListAccounts { pattern } => self.list_accounts(&pattern),
        }
    }

    async fn create_account(&self, username: String, password: String) -> GatewayResult<Reply> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(ChatError::InvalidRequest("username is required".into()).into());
        }
        self.policy.validate(&password)?;
        if self.read(|state| state.account(&username).is_some())? {
            return Err(ChatError::DuplicateAccount.into());
        }

        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))??;

        self.write(
            Operation::CreateAccount {
                username,
                password_hash,
            },
            |_, _| (),
        )
        .await?;
        Ok(Reply::ok("Account created successfully"))
    }

    async fn login(
        &self,
        session: &mut Session,
        username: String,
        password: String,
    ) -> GatewayResult<Reply> {
        if let Some(current) = session.account().cloned() {
            if self.read(|state| state.resolves(&current))? {
                return Err(ChatError::InvalidRequest(format!(
                    "already logged in as {}",
                    current.username
                ))
                .into());
            }
            self.forget(session).await;
        }

        let account = self.check_password(&username, password).await?;

        let mut presence = self.presence.lock().await;
        let unread = self
            .submit(
                Some(account.clone()),
                Operation::Login { username },
                |_, outcome| match outcome {
                    Outcome::LoggedIn { unread } => *unread,
                    _ => 0,
                },
            )
            .await
            .map_err(|e| match e {
                // Deleted after the password check.
                GatewayError::Validation(ChatError::NotLoggedIn) => {
                    ChatError::InvalidCredentials.into()
                }
                other => other,
            })?;
        *presence.entry(account.id).or_insert(0) += 1;
        session.login(account);

        Ok(Reply::ok(format!(
            "Login successful. You have {} unread messages.",
            unread
        ))
        .with_payload(json!({ "unread": unread })))
    }

    /// The session ends whether or not anything needs to be logged.
    async fn logout(&self, session: &mut Session) -> GatewayResult<Reply> {
        let account = session.logout().ok_or(ChatError::NotLoggedIn)?;
        let mut presence = self.presence.lock().await;
        if leave(&mut presence, account.id) {
            let op = Operation::Logout {
                username: account.username.clone(),
            };
            match self.submit(Some(account), op, |_, _| ()).await {
                // Account already deleted; nothing left to mark offline.
                Ok(()) | Err(GatewayError::Validation(ChatError::NotLoggedIn)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Reply::ok("Logged out successfully"))
    }

    async fn delete_account(&self, session: &mut Session, password: String) -> GatewayResult<Reply> {
        let account = self.session_account(session).await?;
        self.check_password(&account.username, password).await?;

        let id = account.id;
        let op = Operation::DeleteAccount {
            username: account.username.clone(),
        };
        self.write_as(session, account, op, |_, _| ()).await?;
        session.logout();
        // Other sessions of this account find out on their next request.
        self.presence.lock().await.remove(&id);
        Ok(Reply::ok("Account deleted"))
    }

    fn list_accounts(&self, pattern: &str) -> GatewayResult<Reply> {
        let pattern = AccountPattern::compile(pattern)?;
        let accounts = self.read(|state| state.list_accounts(&pattern))?;
        Ok(Reply::ok(format!("Found {} accounts", accounts.len()))
            .with_payload(json!({ "accounts": accounts })))
    }

    /// The account the password unlocks. Unknown user and wrong password
    /// are indistinguishable.
    async fn check_password(&self, username: &str, password: String) -> GatewayResult<AccountRef> {
        let (stored, account) = self
            .read(|state| {
                state
                    .account(username)
                    .map(|a| (a.password_hash.clone(), AccountRef::of(a)))
            })?
            .ok_or(ChatError::InvalidCredentials)?;

        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !valid {
            return Err(ChatError::InvalidCredentials.into());
        }
        Ok(account)
    }

    /// The session's account, if it still exists. Otherwise the session is
    /// logged out and the request fails with `NotLoggedIn`.
    async fn session_account(&self, session: &mut Session) -> GatewayResult<AccountRef> {
        let account = session.require_account()?.clone();
        if self.read(|state| state.resolves(&account))? {
            return Ok(account);
        }
        self.forget(session).await;
        Err(ChatError::NotLoggedIn.into())
    }

    /// Drop a session whose account no longer exists. Nothing is logged.
    async fn forget(&self, session: &mut Session) {
        if let Some(account) = session.logout() {
            leave(&mut *self.presence.lock().await, account.id);
        }
    }

    fn read<R>(&self, f: impl FnOnce(&ChatState) -> R) -> GatewayResult<R> {
        let core = self.core.read()?;
        Ok(f(core.state()))
    }

    async fn write<R, F>(&self, op: Operation, read: F) -> GatewayResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        self.submit(None, op, read).await
    }

    /// Write on behalf of the session's account; the account is re-checked
    /// under the write lock.
    async fn write_as<R, F>(
        &self,
        session: &mut Session,
        account: AccountRef,
        op: Operation,
        read: F,
    ) -> GatewayResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        let result = self.submit(Some(account), op, read).await;
        if let Err(GatewayError::Validation(ChatError::NotLoggedIn)) = &result {
            self.forget(session).await;
        }
        result
    }

    async fn submit<R, F>(&self, account: Option<AccountRef>, op: Operation, read: F) -> GatewayResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ChatState, &Outcome) -> R + Send + 'static,
    {
        let view = self.role_view();
        if !view.accepts_writes() {
            return Err(self.not_master(&view));
        }
        let result = match account {
            Some(account) => self.core.submit_as(view.epoch, account, op, read).await,
            None => self.core.submit(view.epoch, op, read).await,
        };
        match result {
            Ok(r) => Ok(r),
            // Stepped down between the role check and the append.
            Err(CoreError::Fenced(_)) => Err(self.not_master(&self.role_view())),
            Err(e) => Err(e.into()),
        }
    }

    fn not_master(&self, view: &RoleView) -> GatewayError {
        let master_id = view.master_id.filter(|id| *id != view.node_id);
        GatewayError::NotMaster {
            master_id,
            address: master_id.and_then(|id| self.cluster.client_addr(id)),
        }
    }
}

/// Count one session of `id` out. True if it was the last.
fn leave(presence: &mut HashMap<AccountId, usize>, id: AccountId) -> bool {
    match presence.get_mut(&id) {
        Some(count) if *count > 1 => {
            *count -= 1;
            false
        }
        Some(_) => {
            presence.remove(&id);
            true
        }
        None => false,
    }
}
