//! Recovery subsystem
//!
//! A node's state is always the replay of its snapshot plus the retained
//! log entries after it. Recovery rebuilds that state on startup; the same
//! replay code applies entries shipped from the Master at runtime.
//!
//! - Replay is sequential and deterministic
//! - Every replayed entry must reproduce its recorded outcome
//! - Corruption or divergence halts the node

mod errors;
mod replay;
mod startup;

pub use errors::{RecoveryError, RecoveryErrorCode, RecoveryResult};
pub use replay::{EntryApply, LogReplayer, ReplayStats};
pub use startup::{Recovered, RecoveryManager};
