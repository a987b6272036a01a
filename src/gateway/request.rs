//! Client requests and replies
//!
//! Requests are what a decoded client frame asks for. Session-bound
//! requests act on behalf of the connection's logged-in user.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::GatewayError;
use crate::cluster::NodeId;
use crate::state::MessageId;

fn default_count() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    CreateAccount {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    DeleteAccount {
        password: String,
    },
    SendMessage {
        recipient: String,
        message: String,
    },
    /// Fetch and consume undelivered messages
    GetUndelivered {
        #[serde(default = "default_count")]
        count: usize,
    },
    /// Message history: already delivered messages
    GetMessages {
        #[serde(default = "default_count")]
        count: usize,
    },
    DeleteMessages {
        ids: Vec<MessageId>,
    },
    ListAccounts {
        #[serde(default)]
        pattern: String,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateAccount { .. } => "create_account",
            Self::Login { .. } => "login",
            Self::Logout => "logout",
            Self::DeleteAccount { .. } => "delete_account",
            Self::SendMessage { .. } => "send_message",
            Self::GetUndelivered { .. } => "get_undelivered",
            Self::GetMessages { .. } => "get_messages",
            Self::DeleteMessages { .. } => "delete_messages",
            Self::ListAccounts { .. } => "list_accounts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub master_id: Option<NodeId>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: None,
            error: None,
            redirect: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn failure(err: &GatewayError) -> Self {
        let redirect = match err {
            GatewayError::NotMaster { master_id, address } => Some(Redirect {
                master_id: *master_id,
                address: address.clone(),
            }),
            _ => None,
        };
        Self {
            success: false,
            message: err.to_string(),
            payload: None,
            error: Some(err.kind().to_string()),
            redirect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_login() {
        let req: Request =
            serde_json::from_value(json!({"command": "login", "username": "alice", "password": "pw"}))
                .unwrap();
        assert_eq!(
            req,
            Request::Login {
                username: "alice".into(),
                password: "pw".into()
            }
        );
    }

    #[test]
    fn test_count_defaults() {
        let req: Request = serde_json::from_value(json!({"command": "get_undelivered"})).unwrap();
        assert_eq!(req, Request::GetUndelivered { count: 10 });
    }

    #[test]
    fn test_not_master_reply_carries_redirect() {
        let reply = Reply::failure(&GatewayError::NotMaster {
            master_id: Some(2),
            address: Some("127.0.0.1:7002".into()),
        });
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("NotMaster"));
        assert_eq!(reply.redirect.unwrap().address.as_deref(), Some("127.0.0.1:7002"));
    }

    #[test]
    fn test_ok_reply_omits_empty_fields() {
        let json = serde_json::to_value(Reply::ok("Message sent")).unwrap();
        assert_eq!(json, json!({"success": true, "message": "Message sent"}));
    }
}
