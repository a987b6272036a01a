//! CRC32 (IEEE) checksums for log records, snapshots and peer frames.

use crc32fast::Hasher;

/// Checksum over one or more byte slices, as if they were concatenated.
pub fn checksum_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Checksum over a single buffer.
pub fn checksum(data: &[u8]) -> u32 {
    checksum_parts(&[data])
}
