//! Log writer with fsync after every append.
//!
//! An entry is only acknowledged, applied or shipped to peers after its
//! record is on disk.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::errors::{WalError, WalResult};
use super::record::LogEntry;

/// Append-only writer over `replication.log`.
pub struct LogWriter {
    path: PathBuf,
    file: File,
}

impl LogWriter {
    /// Open or create the log file, creating parent directories.
    pub fn open(path: &Path) -> WalResult<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                WalError::append_failed(
                    format!("Failed to create log directory: {}", dir.display()),
                    e,
                )
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                WalError::append_failed(format!("Failed to open log file: {}", path.display()), e)
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and fsync.
    ///
    /// # Errors
    ///
    /// - `REPLICHAT_LOG_APPEND_FAILED` if the write fails
    /// - `REPLICHAT_LOG_FSYNC_FAILED` if fsync fails (FATAL)
    pub fn append(&mut self, entry: &LogEntry) -> WalResult<()> {
        let bytes = entry.encode().map_err(|e| {
            WalError::append_failed(
                format!("Failed to encode entry at sequence {}", entry.sequence),
                e,
            )
        })?;

        self.file.write_all(&bytes).map_err(|e| {
            WalError::append_failed(
                format!("Failed to write entry at sequence {}", entry.sequence),
                e,
            )
        })?;

        self.file.sync_all().map_err(|e| {
            WalError::fsync_failed(
                format!("fsync failed after append at sequence {}", entry.sequence),
                e,
            )
        })
    }

    /// Cut the file to `len` bytes. Used to drop a torn tail record.
    pub fn truncate_to(&mut self, len: u64) -> WalResult<()> {
        self.file.set_len(len).map_err(|e| {
            WalError::append_failed(
                format!("Failed to truncate log file: {}", self.path.display()),
                e,
            )
        })?;
        self.file
            .sync_all()
            .map_err(|e| WalError::fsync_failed("fsync failed after truncation", e))
    }

    /// Drop every entry. The caller has already made the covered prefix
    /// durable elsewhere (a snapshot) or is discarding it on purpose.
    pub fn clear(&mut self) -> WalResult<()> {
        self.truncate_to(0)?;
        sync_dir(&self.path)
    }
}

/// fsync the directory holding `path` so renames and truncations survive a crash.
pub(crate) fn sync_dir(path: &Path) -> WalResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => return Ok(()),
    };
    let handle = File::open(dir).map_err(|e| {
        WalError::append_failed(
            format!("Failed to open directory for fsync: {}", dir.display()),
            e,
        )
    })?;
    handle.sync_all().map_err(|e| {
        WalError::fsync_failed(format!("Failed to fsync directory: {}", dir.display()), e)
    })
}
