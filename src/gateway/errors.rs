//! # Gateway Errors
//!
//! Everything a client can be told went wrong.

use thiserror::Error;

use crate::cluster::NodeId;
use crate::node::CoreError;
use crate::state::ChatError;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Rejected by validation; never retried
    #[error("{0}")]
    Validation(#[from] ChatError),

    /// This node does not accept writes; `address` is the best known Master
    #[error("Not the master")]
    NotMaster {
        master_id: Option<NodeId>,
        address: Option<String>,
    },

    /// Transient; safe to retry
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Request could not be decoded
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Stable name sent to clients next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.kind(),
            Self::NotMaster { .. } => "NotMaster",
            Self::Unavailable(_) => "Unavailable",
            Self::Malformed(_) => "Malformed",
        }
    }
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Rejected(e) => GatewayError::Validation(e),
            CoreError::Persistence(msg) | CoreError::Unavailable(msg) => {
                GatewayError::Unavailable(msg)
            }
            CoreError::Fenced(epoch) => {
                GatewayError::Unavailable(format!("epoch {} has ended; retry", epoch))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_keeps_chat_kind() {
        let err = GatewayError::from(ChatError::UnknownRecipient);
        assert_eq!(err.kind(), "UnknownRecipient");
        assert_eq!(err.to_string(), "Recipient not found");
    }

    #[test]
    fn test_persistence_failure_is_unavailable() {
        let err = GatewayError::from(CoreError::Persistence("disk full".into()));
        assert_eq!(err.kind(), "Unavailable");
    }
}
