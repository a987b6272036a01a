//! Role manager subsystem
//!
//! Decides whether this node is Master, Replica or Candidate.
//!
//! - Missing heartbeats from the Master is the only failure signal
//! - Promotion order is static: lowest reachable candidate id wins
//! - Every Master claim carries an epoch; higher epochs win
//! - The adopted epoch is persisted before it is acted on

mod errors;
mod manager;
mod marker;
mod state;

pub use errors::{RoleError, RoleErrorKind, RoleResult};
pub use manager::{PeerReport, RoleChange, RoleManager, RoleTimings, RoleView, StartRole};
pub use marker::{DurableMarker, EpochMarker};
pub use state::Role;
