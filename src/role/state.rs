//! Node role state machine
//!
//! ```text
//! Replica --(master silent for the failure timeout)--> Candidate
//! Candidate --(lowest id among reachable candidates)--> Master
//! Candidate --(valid Master claim)--> Replica
//! Master --(higher-epoch Master claim, or local failure)--> Replica
//! any --(shutdown)--> Stopped
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{RoleError, RoleResult};

/// Role of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sole node that accepts and orders writes
    Master,
    /// Applies the Master's log; serves reads
    Replica,
    /// Master presumed dead; waiting to see who promotes
    Candidate,
    /// Shut down; terminal
    Stopped,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "replica",
            Role::Candidate => "candidate",
            Role::Stopped => "stopped",
        }
    }

    /// Replica -> Candidate
    pub fn start_candidacy(self) -> RoleResult<Self> {
        match self {
            Role::Replica => Ok(Role::Candidate),
            Role::Candidate => Ok(Role::Candidate),
            other => Err(RoleError::illegal_transition(format!(
                "cannot become candidate from {}",
                other
            ))),
        }
    }

    /// Candidate -> Master
    pub fn promote(self) -> RoleResult<Self> {
        match self {
            Role::Candidate => Ok(Role::Master),
            Role::Master => Ok(Role::Master),
            other => Err(RoleError::illegal_transition(format!(
                "cannot promote from {}",
                other
            ))),
        }
    }

    /// Any live role -> Replica
    pub fn follow(self) -> RoleResult<Self> {
        match self {
            Role::Stopped => Err(RoleError::illegal_transition(
                "stopped node cannot follow a master",
            )),
            _ => Ok(Role::Replica),
        }
    }

    pub fn stop(self) -> Self {
        Role::Stopped
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_path() {
        let role = Role::Replica.start_candidacy().unwrap();
        assert_eq!(role, Role::Candidate);
        assert_eq!(role.promote().unwrap(), Role::Master);
    }

    #[test]
    fn test_replica_cannot_promote_directly() {
        assert!(Role::Replica.promote().is_err());
    }

    #[test]
    fn test_master_cannot_become_candidate() {
        assert!(Role::Master.start_candidacy().is_err());
    }

    #[test]
    fn test_master_steps_down() {
        assert_eq!(Role::Master.follow().unwrap(), Role::Replica);
        assert_eq!(Role::Candidate.follow().unwrap(), Role::Replica);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let stopped = Role::Master.stop();
        assert!(stopped.follow().is_err());
        assert!(stopped.promote().is_err());
        assert!(stopped.start_candidacy().is_err());
    }
}
