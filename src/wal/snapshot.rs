//! State snapshots
//!
//! A snapshot captures the full chat state as of `last_sequence`. The log
//! only retains entries after it. Snapshots are written atomically: temp
//! file, fsync, rename, fsync of the directory.
//!
//! File layout: `checksum: u32 LE | JSON(StateSnapshot)`.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::checksum::checksum;
use super::errors::{WalError, WalResult};
use super::writer::sync_dir;
use crate::state::ChatState;

const SNAPSHOT_FILE_NAME: &str = "snapshot.bin";

/// Full state as of a log position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub last_sequence: u64,
    pub last_epoch: u64,
    pub state: ChatState,
}

impl StateSnapshot {
    pub fn new(last_sequence: u64, last_epoch: u64, state: ChatState) -> Self {
        Self {
            last_sequence,
            last_epoch,
            state,
        }
    }
}

/// Reads and writes the single snapshot file of a node.
pub struct SnapshotStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl SnapshotStore {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(SNAPSHOT_FILE_NAME),
            temp_path: log_dir.join(format!("{}.tmp", SNAPSHOT_FILE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot atomically.
    pub fn write_atomic(&self, snapshot: &StateSnapshot) -> WalResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WalError::snapshot_failed(format!("failed to create snapshot directory: {}", e))
            })?;
        }

        let body = serde_json::to_vec(snapshot)
            .map_err(|e| WalError::snapshot_failed(format!("failed to encode snapshot: {}", e)))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| io_failed("failed to create temp snapshot", e))?;

        file.write_all(&checksum(&body).to_le_bytes())
            .and_then(|_| file.write_all(&body))
            .map_err(|e| io_failed("failed to write snapshot", e))?;

        file.sync_all()
            .map_err(|e| WalError::fsync_failed("failed to fsync snapshot", e))?;

        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| io_failed("failed to commit snapshot", e))?;

        sync_dir(&self.path)
    }

    /// Read the snapshot if one exists.
    pub fn read(&self) -> WalResult<Option<StateSnapshot>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_failed("failed to read snapshot", e)),
        };

        if bytes.len() < 4 {
            return Err(WalError::corruption("snapshot file truncated"));
        }

        let mut stored = [0u8; 4];
        stored.copy_from_slice(&bytes[..4]);
        if u32::from_le_bytes(stored) != checksum(&bytes[4..]) {
            return Err(WalError::corruption("snapshot checksum mismatch"));
        }

        serde_json::from_slice(&bytes[4..])
            .map(Some)
            .map_err(|e| WalError::corruption(format!("malformed snapshot: {}", e)))
    }
}

fn io_failed(context: &str, e: io::Error) -> WalError {
    WalError::snapshot_failed(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Operation;
    use tempfile::TempDir;

    fn populated_state() -> ChatState {
        let mut state = ChatState::new();
        state
            .apply(&Operation::CreateAccount {
                username: "alice".into(),
                password_hash: "h".into(),
            })
            .unwrap();
        state
    }

    #[test]
    fn test_absent_snapshot_reads_none() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());
        let snapshot = StateSnapshot::new(12, 3, populated_state());

        store.write_atomic(&snapshot).unwrap();

        assert_eq!(store.read().unwrap(), Some(snapshot));
        assert!(!temp.path().join("snapshot.bin.tmp").exists());
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());
        store.write_atomic(&StateSnapshot::new(1, 1, ChatState::new())).unwrap();
        store.write_atomic(&StateSnapshot::new(9, 2, populated_state())).unwrap();

        assert_eq!(store.read().unwrap().unwrap().last_sequence, 9);
    }

    #[test]
    fn test_tampered_snapshot_is_corruption() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path());
        store.write_atomic(&StateSnapshot::new(4, 1, populated_state())).unwrap();

        let mut bytes = fs::read(store.path()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        fs::write(store.path(), &bytes).unwrap();

        assert!(store.read().unwrap_err().is_fatal());
    }
}
