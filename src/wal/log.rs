//! Replication log
//!
//! Ordered, durable sequence of `LogEntry` values. Sequences start at 1 and
//! increase by exactly one. Entries at or below the snapshot boundary have
//! been compacted into `snapshot.bin`; everything after it lives in
//! `replication.log` and is mirrored in memory for shipping to peers.

use std::path::Path;

use super::errors::{WalError, WalResult};
use super::reader::LogReader;
use super::record::LogEntry;
use super::snapshot::{SnapshotStore, StateSnapshot};
use super::writer::LogWriter;
use crate::state::{Operation, Outcome};

const LOG_FILE_NAME: &str = "replication.log";

/// Result of opening a log directory.
pub struct OpenedLog {
    pub log: ReplicationLog,
    /// Snapshot to seed replay with, if one exists
    pub snapshot: Option<StateSnapshot>,
    /// Entries after the snapshot, in order
    pub entries: Vec<LogEntry>,
    /// A torn final record was found and cut off
    pub truncated_tail: bool,
}

/// The durable replication log of one node.
pub struct ReplicationLog {
    writer: LogWriter,
    snapshots: SnapshotStore,
    snapshot_sequence: u64,
    snapshot_epoch: u64,
    entries: Vec<LogEntry>,
}

impl ReplicationLog {
    /// Open (or create) the log stored in `dir`.
    pub fn open(dir: &Path) -> WalResult<OpenedLog> {
        let path = dir.join(LOG_FILE_NAME);
        let snapshots = SnapshotStore::new(dir);
        let snapshot = snapshots.read()?;
        let (snapshot_sequence, snapshot_epoch) = snapshot
            .as_ref()
            .map(|s| (s.last_sequence, s.last_epoch))
            .unwrap_or((0, 0));

        let (mut entries, valid_len, torn) = match LogReader::open(&path)? {
            Some(mut reader) => {
                let entries = reader.read_all()?;
                (entries, reader.valid_len(), reader.has_torn_tail())
            }
            None => (Vec::new(), 0, false),
        };

        let mut writer = LogWriter::open(&path)?;
        if torn {
            writer.truncate_to(valid_len)?;
        }

        // A crash between writing a snapshot and clearing the file leaves
        // entries the snapshot already covers.
        entries.retain(|e| e.sequence > snapshot_sequence);
        if let Some(first) = entries.first() {
            if first.sequence != snapshot_sequence + 1 {
                return Err(WalError::corruption(format!(
                    "log resumes at {} but snapshot ends at {}",
                    first.sequence, snapshot_sequence
                )));
            }
        }

        let log = Self {
            writer,
            snapshots,
            snapshot_sequence,
            snapshot_epoch,
            entries: entries.clone(),
        };

        Ok(OpenedLog {
            log,
            snapshot,
            entries,
            truncated_tail: torn,
        })
    }

    /// Sequence of the newest entry, or the snapshot boundary if none are retained.
    pub fn last_sequence(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.sequence)
            .unwrap_or(self.snapshot_sequence)
    }

    /// Epoch of the newest entry.
    pub fn last_epoch(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.epoch)
            .unwrap_or(self.snapshot_epoch)
    }

    /// Sequence at or below which entries only exist inside the snapshot.
    pub fn snapshot_sequence(&self) -> u64 {
        self.snapshot_sequence
    }

    /// Number of entries retained after the snapshot.
    pub fn retained_len(&self) -> usize {
        self.entries.len()
    }

    /// Epoch of the entry at `sequence`, if it is known here.
    ///
    /// Sequence 0 is the empty prefix and has epoch 0. The snapshot boundary
    /// is known; anything before it is not.
    pub fn epoch_at(&self, sequence: u64) -> Option<u64> {
        if sequence == 0 {
            return Some(0);
        }
        if sequence == self.snapshot_sequence {
            return Some(self.snapshot_epoch);
        }
        self.entry(sequence).map(|e| e.epoch)
    }

    /// Retained entry at `sequence`.
    pub fn entry(&self, sequence: u64) -> Option<&LogEntry> {
        if sequence <= self.snapshot_sequence {
            return None;
        }
        let index = (sequence - self.snapshot_sequence - 1) as usize;
        self.entries.get(index)
    }

    /// Append a new entry at `last_sequence() + 1`. Used by the Master.
    pub fn append(
        &mut self,
        epoch: u64,
        operation: Operation,
        outcome: Outcome,
    ) -> WalResult<LogEntry> {
        let entry = LogEntry::new(self.last_sequence() + 1, epoch, operation, outcome);
        self.writer.append(&entry)?;
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Append an entry received from the Master.
    ///
    /// The entry must extend the log by exactly one.
    pub fn append_entry(&mut self, entry: LogEntry) -> WalResult<()> {
        let expected = self.last_sequence() + 1;
        if entry.sequence != expected {
            return Err(WalError::out_of_order(expected, entry.sequence));
        }
        self.writer.append(&entry)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Up to `limit` entries with sequence greater than `after`, in order.
    ///
    /// Finite and restartable: calling again with the last sequence seen
    /// continues where the previous call stopped.
    pub fn entries_after(&self, after: u64, limit: usize) -> WalResult<Vec<LogEntry>> {
        if after < self.snapshot_sequence {
            return Err(WalError::not_retained(after, self.snapshot_sequence + 1));
        }
        let start = (after - self.snapshot_sequence) as usize;
        Ok(self
            .entries
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Fold every retained entry into `snapshot` and drop them from the file.
    ///
    /// `snapshot` must describe the state as of `last_sequence()`.
    pub fn compact(&mut self, snapshot: &StateSnapshot) -> WalResult<()> {
        if snapshot.last_sequence != self.last_sequence() {
            return Err(WalError::out_of_order(
                self.last_sequence(),
                snapshot.last_sequence,
            ));
        }
        self.snapshots.write_atomic(snapshot)?;
        self.writer.clear()?;
        self.reset_to(snapshot);
        Ok(())
    }

    /// Replace the whole log with a snapshot shipped by the Master.
    ///
    /// Local entries may disagree with the Master, so the file is cleared
    /// before the snapshot lands: a crash in between leaves an older but
    /// consistent prefix.
    pub fn install_snapshot(&mut self, snapshot: &StateSnapshot) -> WalResult<()> {
        self.writer.clear()?;
        self.snapshots.write_atomic(snapshot)?;
        self.reset_to(snapshot);
        Ok(())
    }

    fn reset_to(&mut self, snapshot: &StateSnapshot) {
        self.snapshot_sequence = snapshot.last_sequence;
        self.snapshot_epoch = snapshot.last_epoch;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatState;
    use tempfile::TempDir;

    fn login(name: &str) -> (Operation, Outcome) {
        (
            Operation::Login {
                username: name.into(),
            },
            Outcome::LoggedIn { unread: 0 },
        )
    }

    fn fill(log: &mut ReplicationLog, epoch: u64, count: usize) {
        for i in 0..count {
            let (op, outcome) = login(&format!("user{}", i));
            log.append(epoch, op, outcome).unwrap();
        }
    }

    #[test]
    fn test_empty_log() {
        let temp = TempDir::new().unwrap();
        let opened = ReplicationLog::open(temp.path()).unwrap();
        assert_eq!(opened.log.last_sequence(), 0);
        assert_eq!(opened.log.last_epoch(), 0);
        assert!(opened.snapshot.is_none());
        assert!(opened.entries.is_empty());
    }

    #[test]
    fn test_sequences_are_contiguous_across_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let mut log = ReplicationLog::open(temp.path()).unwrap().log;
            fill(&mut log, 1, 3);
        }
        let opened = ReplicationLog::open(temp.path()).unwrap();
        assert_eq!(opened.entries.len(), 3);
        let mut log = opened.log;
        let (op, outcome) = login("next");
        assert_eq!(log.append(1, op, outcome).unwrap().sequence, 4);
    }

    #[test]
    fn test_append_entry_rejects_gaps_and_duplicates() {
        let temp = TempDir::new().unwrap();
        let mut log = ReplicationLog::open(temp.path()).unwrap().log;
        let (op, outcome) = login("a");

        let gap = LogEntry::new(2, 1, op.clone(), outcome.clone());
        assert!(log.append_entry(gap).is_err());

        log.append_entry(LogEntry::new(1, 1, op.clone(), outcome.clone()))
            .unwrap();
        let duplicate = LogEntry::new(1, 1, op, outcome);
        assert!(log.append_entry(duplicate).is_err());
        assert_eq!(log.last_sequence(), 1);
    }

    #[test]
    fn test_entries_after_is_restartable() {
        let temp = TempDir::new().unwrap();
        let mut log = ReplicationLog::open(temp.path()).unwrap().log;
        fill(&mut log, 1, 5);

        let first = log.entries_after(0, 2).unwrap();
        assert_eq!(first.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
        let rest = log.entries_after(2, 100).unwrap();
        assert_eq!(rest.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert!(log.entries_after(5, 10).unwrap().is_empty());
        assert!(log.entries_after(9, 10).unwrap().is_empty());
    }

    #[test]
    fn test_compaction_moves_boundary() {
        let temp = TempDir::new().unwrap();
        let mut log = ReplicationLog::open(temp.path()).unwrap().log;
        fill(&mut log, 2, 4);

        log.compact(&StateSnapshot::new(4, 2, ChatState::new())).unwrap();
        assert_eq!(log.last_sequence(), 4);
        assert_eq!(log.last_epoch(), 2);
        assert_eq!(log.epoch_at(4), Some(2));
        assert_eq!(log.epoch_at(3), None);
        assert!(log.entries_after(2, 10).is_err());

        fill(&mut log, 2, 1);
        let opened = ReplicationLog::open(temp.path()).unwrap();
        assert_eq!(opened.snapshot.unwrap().last_sequence, 4);
        assert_eq!(opened.entries.len(), 1);
        assert_eq!(opened.entries[0].sequence, 5);
    }

    #[test]
    fn test_compaction_requires_current_position() {
        let temp = TempDir::new().unwrap();
        let mut log = ReplicationLog::open(temp.path()).unwrap().log;
        fill(&mut log, 1, 3);
        assert!(log.compact(&StateSnapshot::new(2, 1, ChatState::new())).is_err());
    }

    #[test]
    fn test_install_snapshot_discards_local_tail() {
        let temp = TempDir::new().unwrap();
        let mut log = ReplicationLog::open(temp.path()).unwrap().log;
        fill(&mut log, 1, 6);

        log.install_snapshot(&StateSnapshot::new(3, 2, ChatState::new()))
            .unwrap();
        assert_eq!(log.last_sequence(), 3);
        assert_eq!(log.last_epoch(), 2);

        let opened = ReplicationLog::open(temp.path()).unwrap();
        assert!(opened.entries.is_empty());
        assert_eq!(opened.log.last_sequence(), 3);
    }

    #[test]
    fn test_stale_prefix_after_snapshot_is_skipped() {
        let temp = TempDir::new().unwrap();
        {
            let mut log = ReplicationLog::open(temp.path()).unwrap().log;
            fill(&mut log, 1, 3);
        }
        // Snapshot written, file never cleared
        SnapshotStore::new(temp.path())
            .write_atomic(&StateSnapshot::new(2, 1, ChatState::new()))
            .unwrap();

        let opened = ReplicationLog::open(temp.path()).unwrap();
        assert_eq!(opened.entries.len(), 1);
        assert_eq!(opened.entries[0].sequence, 3);
        assert_eq!(opened.log.last_sequence(), 3);
    }
}
