//! Sequential log reader
//!
//! Complete records with a bad checksum or a broken sequence chain are
//! corruption and halt startup. A record cut short at the very end of the
//! file is a torn append from a crash before fsync returned; it was never
//! acknowledged, so the reader stops there and reports where the valid
//! prefix ends.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use super::errors::{WalError, WalResult};
use super::record::{LogEntry, RECORD_OVERHEAD};

/// Reads entries from `replication.log` in order.
pub struct LogReader {
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
    last_sequence: Option<u64>,
    torn_tail: bool,
}

impl LogReader {
    /// Open the log file. Returns `Ok(None)` when the file does not exist.
    pub fn open(path: &Path) -> WalResult<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WalError::corruption(format!(
                    "Failed to open log file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let file_size = file
            .metadata()
            .map_err(|e| WalError::corruption(format!("Failed to read log metadata: {}", e)))?
            .len();

        Ok(Some(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_size,
            last_sequence: None,
            torn_tail: false,
        }))
    }

    /// Byte length of the valid prefix read so far.
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Whether reading stopped at an incomplete final record.
    pub fn has_torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Read the next entry.
    ///
    /// - `Ok(Some(entry))` for a valid record
    /// - `Ok(None)` at end of file or at a torn final record
    /// - `Err` with `REPLICHAT_LOG_CORRUPTION` otherwise
    pub fn read_next(&mut self) -> WalResult<Option<LogEntry>> {
        if self.torn_tail || self.offset >= self.file_size {
            return Ok(None);
        }

        let remaining = self.file_size - self.offset;
        if remaining < RECORD_OVERHEAD as u64 {
            self.torn_tail = true;
            return Ok(None);
        }

        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).map_err(|e| {
            WalError::corruption_at_offset(self.offset, format!("Failed to read length: {}", e))
        })?;
        let record_length = u32::from_le_bytes(len_buf) as u64;

        if record_length < RECORD_OVERHEAD as u64 {
            return Err(WalError::corruption_at_offset(
                self.offset,
                format!("Invalid record length: {}", record_length),
            ));
        }
        if record_length > remaining {
            self.torn_tail = true;
            return Ok(None);
        }

        let mut buf = vec![0u8; record_length as usize];
        buf[0..4].copy_from_slice(&len_buf);
        self.reader.read_exact(&mut buf[4..]).map_err(|e| {
            WalError::corruption_at_offset(self.offset, format!("Failed to read record: {}", e))
        })?;

        let entry = LogEntry::decode(&buf)
            .map_err(|e| WalError::corruption_at_offset(self.offset, e.to_string()))?;

        if let Some(last) = self.last_sequence {
            if entry.sequence != last + 1 {
                return Err(WalError::corruption_at_offset(
                    self.offset,
                    format!(
                        "Non-sequential entry: expected {}, got {}",
                        last + 1,
                        entry.sequence
                    ),
                ));
            }
        }

        self.last_sequence = Some(entry.sequence);
        self.offset += record_length;
        Ok(Some(entry))
    }

    /// Read every remaining entry.
    pub fn read_all(&mut self) -> WalResult<Vec<LogEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
