//! Node startup recovery
//!
//! # Startup sequence
//!
//! 1. Open the replication log (drops a torn final record)
//! 2. Seed state from the snapshot, if any
//! 3. Replay retained entries in order
//! 4. Hand state and log to the node

use std::path::{Path, PathBuf};

use crate::state::ChatState;
use crate::wal::ReplicationLog;

use super::errors::RecoveryResult;
use super::replay::{LogReplayer, ReplayStats};

/// Everything a node needs after recovery.
pub struct Recovered {
    pub state: ChatState,
    pub log: ReplicationLog,
    pub stats: ReplayStats,
    /// Sequence the snapshot covered, if one was loaded
    pub snapshot_sequence: Option<u64>,
    /// A torn final record was discarded
    pub truncated_tail: bool,
}

impl Recovered {
    /// Whether the node had any durable history before this start.
    pub fn has_prior_state(&self) -> bool {
        self.log.last_sequence() > 0
    }
}

/// Rebuilds a node's state from its log directory.
pub struct RecoveryManager {
    log_dir: PathBuf,
}

impl RecoveryManager {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Run recovery. Any failure is fatal for the node.
    pub fn recover(&self) -> RecoveryResult<Recovered> {
        let opened = ReplicationLog::open(&self.log_dir)?;

        let (mut state, start, snapshot_sequence) = match opened.snapshot {
            Some(snapshot) => (
                snapshot.state,
                snapshot.last_sequence,
                Some(snapshot.last_sequence),
            ),
            None => (ChatState::new(), 0, None),
        };

        let stats = LogReplayer::replay(&mut state, start, &opened.entries)?;

        Ok(Recovered {
            state,
            log: opened.log,
            stats,
            snapshot_sequence,
            truncated_tail: opened.truncated_tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Operation, Outcome};
    use crate::wal::StateSnapshot;
    use tempfile::TempDir;

    fn create(name: &str) -> Operation {
        Operation::CreateAccount {
            username: name.into(),
            password_hash: "h".into(),
        }
    }

    #[test]
    fn test_fresh_directory_recovers_empty() {
        let temp = TempDir::new().unwrap();
        let recovered = RecoveryManager::new(temp.path()).recover().unwrap();
        assert_eq!(recovered.state, ChatState::new());
        assert!(!recovered.has_prior_state());
        assert!(recovered.snapshot_sequence.is_none());
    }

    #[test]
    fn test_recovers_snapshot_plus_tail() {
        let temp = TempDir::new().unwrap();
        let mut expected = ChatState::new();
        {
            let mut log = ReplicationLog::open(temp.path()).unwrap().log;
            for name in ["a", "b"] {
                let op = create(name);
                let outcome = expected.apply(&op).unwrap();
                log.append(1, op, outcome).unwrap();
            }
            log.compact(&StateSnapshot::new(2, 1, expected.clone()))
                .unwrap();

            let op = create("c");
            let outcome = expected.apply(&op).unwrap();
            assert_eq!(outcome, Outcome::AccountCreated);
            log.append(1, op, outcome).unwrap();
        }

        let recovered = RecoveryManager::new(temp.path()).recover().unwrap();
        assert_eq!(recovered.snapshot_sequence, Some(2));
        assert_eq!(recovered.stats.entries_replayed, 1);
        assert_eq!(recovered.state, expected);
        assert!(recovered.has_prior_state());
    }

    #[test]
    fn test_recovery_twice_is_identical() {
        let temp = TempDir::new().unwrap();
        {
            let mut state = ChatState::new();
            let mut log = ReplicationLog::open(temp.path()).unwrap().log;
            let op = create("alice");
            let outcome = state.apply(&op).unwrap();
            log.append(1, op, outcome).unwrap();
        }

        let first = RecoveryManager::new(temp.path()).recover().unwrap().state;
        let second = RecoveryManager::new(temp.path()).recover().unwrap().state;
        assert_eq!(first.to_canonical_bytes(), second.to_canonical_bytes());
    }
}
