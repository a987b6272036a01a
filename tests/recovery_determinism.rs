//! Recovery Determinism Tests
//!
//! - Same log, same state, on every recovery
//! - Snapshot plus retained tail equals replaying the full history
//! - A torn final record is dropped without losing earlier entries

use std::fs::OpenOptions;
use std::io::Write;

use replichat::recovery::RecoveryManager;
use replichat::state::{ChatState, MessageOrder, Operation};
use replichat::wal::{ReplicationLog, StateSnapshot};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn history() -> Vec<Operation> {
    vec![
        Operation::CreateAccount {
            username: "alice".into(),
            password_hash: "hash-a".into(),
        },
        Operation::CreateAccount {
            username: "bob".into(),
            password_hash: "hash-b".into(),
        },
        Operation::Login {
            username: "alice".into(),
        },
        Operation::SendMessage {
            sender: "alice".into(),
            recipient: "bob".into(),
            body: "hi bob".into(),
            sent_at_ms: 1_700_000_000_000,
        },
        Operation::SendMessage {
            sender: "alice".into(),
            recipient: "bob".into(),
            body: "are you there".into(),
            sent_at_ms: 1_700_000_000_500,
        },
        Operation::Login {
            username: "bob".into(),
        },
        Operation::GetUndelivered {
            username: "bob".into(),
            count: 1,
            order: MessageOrder::OldestFirst,
        },
        Operation::Logout {
            username: "alice".into(),
        },
    ]
}

/// Write `ops` to a fresh log and return the state the Master ended with.
fn write_history(dir: &std::path::Path, ops: &[Operation]) -> ChatState {
    let mut log = ReplicationLog::open(dir).unwrap().log;
    let mut state = ChatState::new();
    for op in ops {
        let outcome = state.apply(op).unwrap();
        log.append(1, op.clone(), outcome).unwrap();
    }
    state
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_recovery_matches_master_state() {
    let temp = TempDir::new().unwrap();
    let expected = write_history(temp.path(), &history());

    let recovered = RecoveryManager::new(temp.path()).recover().unwrap();

    assert_eq!(recovered.state, expected);
    assert_eq!(recovered.log.last_sequence(), history().len() as u64);
    assert_eq!(recovered.stats.entries_replayed, history().len() as u64);
}

#[test]
fn test_repeated_recovery_is_identical() {
    let temp = TempDir::new().unwrap();
    write_history(temp.path(), &history());

    let first = RecoveryManager::new(temp.path()).recover().unwrap();
    drop(first.log);
    let second = RecoveryManager::new(temp.path()).recover().unwrap();

    assert_eq!(
        first.state.to_canonical_bytes(),
        second.state.to_canonical_bytes()
    );
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_copied_log_recovers_identically() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write_history(a.path(), &history());
    write_history(b.path(), &history());

    let state_a = RecoveryManager::new(a.path()).recover().unwrap().state;
    let state_b = RecoveryManager::new(b.path()).recover().unwrap().state;

    assert_eq!(state_a.to_canonical_bytes(), state_b.to_canonical_bytes());
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_snapshot_plus_tail_equals_full_replay() {
    let ops = history();
    let (head, tail) = ops.split_at(4);

    let full = TempDir::new().unwrap();
    let expected = write_history(full.path(), &ops);

    let compacted = TempDir::new().unwrap();
    {
        let mut log = ReplicationLog::open(compacted.path()).unwrap().log;
        let mut state = ChatState::new();
        for op in head {
            let outcome = state.apply(op).unwrap();
            log.append(1, op.clone(), outcome).unwrap();
        }
        log.compact(&StateSnapshot::new(log.last_sequence(), 1, state.clone()))
            .unwrap();
        for op in tail {
            let outcome = state.apply(op).unwrap();
            log.append(1, op.clone(), outcome).unwrap();
        }
    }

    let recovered = RecoveryManager::new(compacted.path()).recover().unwrap();
    assert_eq!(recovered.snapshot_sequence, Some(head.len() as u64));
    assert_eq!(recovered.stats.entries_replayed, tail.len() as u64);
    assert_eq!(recovered.state, expected);
    assert_eq!(recovered.log.last_sequence(), ops.len() as u64);
}

// =============================================================================
// Torn tail
// =============================================================================

#[test]
fn test_torn_tail_is_truncated() {
    let temp = TempDir::new().unwrap();
    let expected = write_history(temp.path(), &history());

    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(temp.path().join("replication.log"))
            .unwrap();
        // Length prefix promising more bytes than follow
        file.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
        file.sync_all().unwrap();
    }

    let recovered = RecoveryManager::new(temp.path()).recover().unwrap();
    assert!(recovered.truncated_tail);
    assert_eq!(recovered.state, expected);
    assert_eq!(recovered.log.last_sequence(), history().len() as u64);
}
