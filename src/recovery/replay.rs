//! Log replay
//!
//! Entries are applied strictly in sequence order. Each one must reproduce
//! the outcome recorded when the Master first applied it; anything else
//! means this node's history differs from the log and replay stops.

use std::collections::BTreeMap;

use crate::state::{ChatError, ChatState, Operation, Outcome};
use crate::wal::LogEntry;

use super::errors::{RecoveryError, RecoveryResult};

/// Something a log entry can be applied to.
pub trait EntryApply {
    fn apply_operation(&mut self, operation: &Operation) -> Result<Outcome, ChatError>;
}

impl EntryApply for ChatState {
    fn apply_operation(&mut self, operation: &Operation) -> Result<Outcome, ChatError> {
        self.apply(operation)
    }
}

/// Statistics from a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub entries_replayed: u64,
    /// Replayed entries per operation kind
    pub by_kind: BTreeMap<&'static str, u64>,
    /// Sequence of the last applied entry, or the starting point if none
    pub final_sequence: u64,
}

/// Applies log entries to state.
pub struct LogReplayer;

impl LogReplayer {
    /// Apply one entry and check its outcome.
    pub fn apply_entry<S: EntryApply>(state: &mut S, entry: &LogEntry) -> RecoveryResult<()> {
        let outcome = state
            .apply_operation(&entry.operation)
            .map_err(|e| RecoveryError::rejected_entry(entry.sequence, e.to_string()))?;

        if outcome != entry.outcome {
            return Err(RecoveryError::divergence(
                entry.sequence,
                format!("recorded {:?}, replayed {:?}", entry.outcome, outcome),
            ));
        }
        Ok(())
    }

    /// Replay `entries` on top of a state positioned at `start_sequence`.
    ///
    /// Replaying the same entries onto the same starting state always
    /// yields the same final state.
    pub fn replay<'a, S, I>(
        state: &mut S,
        start_sequence: u64,
        entries: I,
    ) -> RecoveryResult<ReplayStats>
    where
        S: EntryApply,
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut stats = ReplayStats {
            final_sequence: start_sequence,
            ..ReplayStats::default()
        };

        for entry in entries {
            if entry.sequence != stats.final_sequence + 1 {
                return Err(RecoveryError::log_corruption(format!(
                    "replay expected sequence {}, found {}",
                    stats.final_sequence + 1,
                    entry.sequence
                )));
            }

            Self::apply_entry(state, entry)?;

            stats.entries_replayed += 1;
            *stats.by_kind.entry(entry.operation.kind()).or_insert(0) += 1;
            stats.final_sequence = entry.sequence;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveryErrorCode;

    fn entry(sequence: u64, operation: Operation, outcome: Outcome) -> LogEntry {
        LogEntry::new(sequence, 1, operation, outcome)
    }

    fn history() -> Vec<LogEntry> {
        vec![
            entry(
                1,
                Operation::CreateAccount {
                    username: "alice".into(),
                    password_hash: "h1".into(),
                },
                Outcome::AccountCreated,
            ),
            entry(
                2,
                Operation::CreateAccount {
                    username: "bob".into(),
                    password_hash: "h2".into(),
                },
                Outcome::AccountCreated,
            ),
            entry(
                3,
                Operation::SendMessage {
                    sender: "alice".into(),
                    recipient: "bob".into(),
                    body: "hi".into(),
                    sent_at_ms: 10,
                },
                Outcome::MessageStored {
                    id: 1,
                    delivered: false,
                },
            ),
        ]
    }

    #[test]
    fn test_replay_counts_kinds() {
        let mut state = ChatState::new();
        let stats = LogReplayer::replay(&mut state, 0, &history()).unwrap();

        assert_eq!(stats.entries_replayed, 3);
        assert_eq!(stats.final_sequence, 3);
        assert_eq!(stats.by_kind.get("create_account"), Some(&2));
        assert_eq!(state.undelivered_count("bob"), 1);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mut a = ChatState::new();
        let mut b = ChatState::new();
        LogReplayer::replay(&mut a, 0, &history()).unwrap();
        LogReplayer::replay(&mut b, 0, &history()).unwrap();
        assert_eq!(a.to_canonical_bytes(), b.to_canonical_bytes());
    }

    #[test]
    fn test_outcome_mismatch_is_divergence() {
        let mut entries = history();
        entries[2].outcome = Outcome::MessageStored {
            id: 9,
            delivered: false,
        };

        let err = LogReplayer::replay(&mut ChatState::new(), 0, &entries).unwrap_err();
        assert_eq!(err.code(), RecoveryErrorCode::Divergence);
        assert_eq!(err.sequence(), Some(3));
    }

    #[test]
    fn test_rejected_entry_stops_replay() {
        let mut entries = history();
        entries.truncate(1);
        entries.push(entry(
            2,
            Operation::CreateAccount {
                username: "alice".into(),
                password_hash: "again".into(),
            },
            Outcome::AccountCreated,
        ));

        let err = LogReplayer::replay(&mut ChatState::new(), 0, &entries).unwrap_err();
        assert_eq!(err.code(), RecoveryErrorCode::RejectedEntry);
    }

    #[test]
    fn test_gap_is_corruption() {
        let mut entries = history();
        entries.remove(1);
        let err = LogReplayer::replay(&mut ChatState::new(), 0, &entries).unwrap_err();
        assert_eq!(err.code(), RecoveryErrorCode::LogCorruption);
    }
}
