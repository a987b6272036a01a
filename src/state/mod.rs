//! State machine subsystem
//!
//! Accounts, messages and the deterministic `apply` function that every node
//! runs over the replication log.

mod credentials;
mod errors;
mod machine;
mod operation;
mod pattern;
mod types;

pub use credentials::{hash_password, verify_password, PasswordPolicy};
pub use errors::{ChatError, ChatResult};
pub use machine::ChatState;
pub use operation::{Operation, Outcome};
pub use pattern::AccountPattern;
pub use types::{
    Account, AccountId, AccountRef, AccountSummary, Message, MessageId, MessageOrder,
};
