//! Replica-side entry classification
//!
//! A replica's log must stay a prefix of the Master's. Each incoming entry is
//! classified against the local log before it is applied:
//!
//! - below or at the local end with the same epoch: duplicate, skip
//! - exactly next with an epoch not older than ours: apply
//! - past the next sequence: gap, request a backfill
//! - anything else: histories differ, resync

use super::cursor::LogPosition;
use crate::wal::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveResult {
    /// Next in sequence; apply it
    Accepted,
    /// Already present locally
    Duplicate,
    /// Entries missing between the local log and this one
    GapDetected { expected: u64, received: u64 },
    /// Same sequence, different history
    Conflict { sequence: u64 },
}

pub fn classify<L: LogPosition>(log: &L, entry: &LogEntry) -> ReceiveResult {
    let last = log.last_sequence();

    if entry.sequence <= last {
        return match log.epoch_at(entry.sequence) {
            Some(epoch) if epoch != entry.epoch => ReceiveResult::Conflict {
                sequence: entry.sequence,
            },
            // Compacted entries cannot be compared; the snapshot boundary check
            // on the next heartbeat catches real conflicts.
            _ => ReceiveResult::Duplicate,
        };
    }

    if entry.sequence > last + 1 {
        return ReceiveResult::GapDetected {
            expected: last + 1,
            received: entry.sequence,
        };
    }

    if entry.epoch < log.last_epoch() {
        return ReceiveResult::Conflict {
            sequence: entry.sequence,
        };
    }

    ReceiveResult::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Operation, Outcome};

    struct FakeLog(Vec<u64>);

    impl LogPosition for FakeLog {
        fn last_sequence(&self) -> u64 {
            self.0.len() as u64
        }

        fn last_epoch(&self) -> u64 {
            self.0.last().copied().unwrap_or(0)
        }

        fn epoch_at(&self, sequence: u64) -> Option<u64> {
            if sequence == 0 {
                return Some(0);
            }
            self.0.get(sequence as usize - 1).copied()
        }
    }

    fn entry(sequence: u64, epoch: u64) -> LogEntry {
        LogEntry::new(sequence, epoch, Operation::ResetPresence, Outcome::PresenceReset {
            went_offline: 0,
        })
    }

    #[test]
    fn test_next_entry_is_accepted() {
        let log = FakeLog(vec![1, 1]);
        assert_eq!(classify(&log, &entry(3, 1)), ReceiveResult::Accepted);
        assert_eq!(classify(&log, &entry(3, 2)), ReceiveResult::Accepted);
    }

    #[test]
    fn test_first_entry_on_empty_log() {
        let log = FakeLog(vec![]);
        assert_eq!(classify(&log, &entry(1, 1)), ReceiveResult::Accepted);
    }

    #[test]
    fn test_duplicate_is_skipped() {
        let log = FakeLog(vec![1, 1, 2]);
        assert_eq!(classify(&log, &entry(2, 1)), ReceiveResult::Duplicate);
        assert_eq!(classify(&log, &entry(3, 2)), ReceiveResult::Duplicate);
    }

    #[test]
    fn test_gap_detected() {
        let log = FakeLog(vec![1]);
        assert_eq!(
            classify(&log, &entry(4, 1)),
            ReceiveResult::GapDetected {
                expected: 2,
                received: 4
            }
        );
    }

    #[test]
    fn test_epoch_regression_is_conflict() {
        let log = FakeLog(vec![1, 3]);
        assert_eq!(
            classify(&log, &entry(3, 2)),
            ReceiveResult::Conflict { sequence: 3 }
        );
    }

    #[test]
    fn test_same_sequence_other_epoch_is_conflict() {
        let log = FakeLog(vec![1, 1, 1]);
        assert_eq!(
            classify(&log, &entry(3, 2)),
            ReceiveResult::Conflict { sequence: 3 }
        );
    }
}
