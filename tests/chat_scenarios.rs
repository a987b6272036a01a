//! Chat Scenario Tests
//!
//! End-to-end behavior of the Master write path on one node: validation,
//! logging, and what a restart sees afterwards.

use replichat::node::{ChatCore, CoreError};
use replichat::recovery::RecoveryManager;
use replichat::state::{ChatError, ChatState, MessageOrder, Operation, Outcome};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open(dir: &std::path::Path) -> ChatCore {
    let recovered = RecoveryManager::new(dir).recover().unwrap();
    ChatCore::new(recovered, dir, 10_000)
}

fn submit(core: &mut ChatCore, op: Operation) -> Result<Outcome, CoreError> {
    core.submit(1, op, |_, outcome| outcome.clone())
        .map(|(_, outcome)| outcome)
}

fn create(name: &str) -> Operation {
    Operation::CreateAccount {
        username: name.into(),
        password_hash: format!("hash-{}", name),
    }
}

fn send(from: &str, to: &str, body: &str, at: i64) -> Operation {
    Operation::SendMessage {
        sender: from.into(),
        recipient: to.into(),
        body: body.into(),
        sent_at_ms: at,
    }
}

fn undelivered(name: &str, count: usize) -> Operation {
    Operation::GetUndelivered {
        username: name.into(),
        count,
        order: MessageOrder::OldestFirst,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_offline_delivery() {
    let temp = TempDir::new().unwrap();
    let mut core = open(temp.path());

    submit(&mut core, create("alice")).unwrap();
    submit(&mut core, create("bob")).unwrap();
    submit(&mut core, Operation::Login { username: "alice".into() }).unwrap();

    let stored = submit(&mut core, send("alice", "bob", "first", 10)).unwrap();
    assert!(matches!(stored, Outcome::MessageStored { delivered: false, .. }));
    submit(&mut core, send("alice", "bob", "second", 20)).unwrap();

    let login = submit(&mut core, Operation::Login { username: "bob".into() }).unwrap();
    assert_eq!(login, Outcome::LoggedIn { unread: 2 });

    let first = submit(&mut core, undelivered("bob", 1)).unwrap();
    let rest = submit(&mut core, undelivered("bob", 10)).unwrap();
    match (first, rest) {
        (Outcome::Delivered { ids: a }, Outcome::Delivered { ids: b }) => {
            assert_eq!(a.len(), 1);
            assert_eq!(b.len(), 1);
            assert!(a[0] < b[0]);
        }
        other => panic!("unexpected outcomes {:?}", other),
    }
    assert_eq!(core.state().undelivered_count("bob"), 0);
}

#[test]
fn test_unknown_recipient_is_not_logged() {
    let temp = TempDir::new().unwrap();
    let mut core = open(temp.path());
    submit(&mut core, create("alice")).unwrap();
    submit(&mut core, Operation::Login { username: "alice".into() }).unwrap();
    let before = core.last_sequence();

    let err = submit(&mut core, send("alice", "nobody", "hello?", 5)).unwrap_err();

    assert!(matches!(err, CoreError::Rejected(ChatError::UnknownRecipient)));
    assert_eq!(core.last_sequence(), before);
}

#[test]
fn test_duplicate_account_is_not_logged() {
    let temp = TempDir::new().unwrap();
    let mut core = open(temp.path());
    submit(&mut core, create("alice")).unwrap();

    let err = submit(&mut core, create("alice")).unwrap_err();

    assert!(matches!(err, CoreError::Rejected(ChatError::DuplicateAccount)));
    assert_eq!(core.last_sequence(), 1);
}

#[test]
fn test_deleted_account_frees_username() {
    let temp = TempDir::new().unwrap();
    let mut core = open(temp.path());
    submit(&mut core, create("alice")).unwrap();
    submit(&mut core, Operation::DeleteAccount { username: "alice".into() }).unwrap();

    assert!(core.state().account("alice").is_none());
    submit(&mut core, create("alice")).unwrap();
}

#[test]
fn test_reset_presence_logs_everyone_out() {
    let temp = TempDir::new().unwrap();
    let mut core = open(temp.path());
    for name in ["alice", "bob"] {
        submit(&mut core, create(name)).unwrap();
        submit(&mut core, Operation::Login { username: name.into() }).unwrap();
    }

    let outcome = submit(&mut core, Operation::ResetPresence).unwrap();

    assert_eq!(outcome, Outcome::PresenceReset { went_offline: 2 });
}

#[test]
fn test_restart_sees_every_acknowledged_write() {
    let temp = TempDir::new().unwrap();
    let expected = {
        let mut core = open(temp.path());
        submit(&mut core, create("alice")).unwrap();
        submit(&mut core, create("bob")).unwrap();
        submit(&mut core, Operation::Login { username: "alice".into() }).unwrap();
        submit(&mut core, send("alice", "bob", "persisted", 1)).unwrap();
        core.state().clone()
    };

    let restarted = open(temp.path());

    assert_eq!(restarted.state(), &expected);
    assert_eq!(restarted.last_sequence(), 4);
    assert_ne!(restarted.state(), &ChatState::new());
}
