//! Log entry format
//!
//! On disk each entry is one record:
//!
//! ```text
//! record_length: u32 LE   (whole record, including this field)
//! sequence:      u64 LE
//! epoch:         u64 LE
//! body:          JSON { "operation": ..., "outcome": ... }
//! checksum:      u32 LE   (CRC32 over everything before it)
//! ```

use std::io;

use serde::{Deserialize, Serialize};

use super::checksum::checksum;
use crate::state::{Operation, Outcome};

/// Fixed bytes around the JSON body.
pub const RECORD_OVERHEAD: usize = 4 + 8 + 8 + 4;

/// One replicated, durably logged operation.
///
/// `outcome` is the result the Master observed when it first applied the
/// operation. Replays must reproduce it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub epoch: u64,
    pub operation: Operation,
    pub outcome: Outcome,
}

#[derive(Serialize, Deserialize)]
struct EntryBody {
    operation: Operation,
    outcome: Outcome,
}

impl LogEntry {
    pub fn new(sequence: u64, epoch: u64, operation: Operation, outcome: Outcome) -> Self {
        Self {
            sequence,
            epoch,
            operation,
            outcome,
        }
    }

    /// Encode to the on-disk record format.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let body = serde_json::to_vec(&EntryBody {
            operation: self.operation.clone(),
            outcome: self.outcome.clone(),
        })
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let record_length = RECORD_OVERHEAD + body.len();
        let record_length_u32 = u32::try_from(record_length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "entry too large"))?;

        let mut buf = Vec::with_capacity(record_length);
        buf.extend_from_slice(&record_length_u32.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&body);
        let crc = checksum(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode one complete record.
    ///
    /// `buf` must hold exactly `record_length` bytes.
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < RECORD_OVERHEAD {
            return Err(invalid("record shorter than fixed overhead"));
        }

        let declared = u32::from_le_bytes(read_array(&buf[0..4])?) as usize;
        if declared != buf.len() {
            return Err(invalid(format!(
                "record length mismatch: declared {}, have {}",
                declared,
                buf.len()
            )));
        }

        let crc_offset = buf.len() - 4;
        let stored = u32::from_le_bytes(read_array(&buf[crc_offset..])?);
        let computed = checksum(&buf[..crc_offset]);
        if stored != computed {
            return Err(invalid(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }

        let sequence = u64::from_le_bytes(read_array(&buf[4..12])?);
        let epoch = u64::from_le_bytes(read_array(&buf[12..20])?);
        let body: EntryBody = serde_json::from_slice(&buf[20..crc_offset])
            .map_err(|e| invalid(format!("malformed entry body: {}", e)))?;

        Ok(Self {
            sequence,
            epoch,
            operation: body.operation,
            outcome: body.outcome,
        })
    }
}

fn read_array<const N: usize>(slice: &[u8]) -> io::Result<[u8; N]> {
    slice
        .try_into()
        .map_err(|_| invalid("slice length does not match field width"))
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}
