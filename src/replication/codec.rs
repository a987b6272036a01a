//! Peer frame codec
//!
//! Frame layout:
//!
//! ```text
//! | length: u32 LE | checksum: u32 LE | body: JSON(PeerMessage) |
//! ```
//!
//! `length` counts the body only. The checksum is CRC32 over the body.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::errors::{ReplicationError, ReplicationResult};
use super::message::PeerMessage;
use crate::wal::checksum;

/// Frames above this size are rejected without reading the body.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 8;

pub fn encode_frame(message: &PeerMessage) -> ReplicationResult<Vec<u8>> {
    let body = serde_json::to_vec(message)
        .map_err(|e| ReplicationError::codec(format!("failed to encode {}: {}", message.kind(), e)))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ReplicationError::codec(format!(
            "{} frame of {} bytes exceeds limit",
            message.kind(),
            body.len()
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&checksum(&body).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_body(expected_checksum: u32, body: &[u8]) -> ReplicationResult<PeerMessage> {
    let actual = checksum(body);
    if actual != expected_checksum {
        return Err(ReplicationError::codec(format!(
            "frame checksum mismatch: expected {:08x}, got {:08x}",
            expected_checksum, actual
        )));
    }
    serde_json::from_slice(body)
        .map_err(|e| ReplicationError::codec(format!("malformed frame body: {}", e)))
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<ReplicationResult<PeerMessage>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_FRAME_LEN {
        return Ok(Some(Err(ReplicationError::codec(format!(
            "frame length {} exceeds limit",
            len
        )))));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_body(crc, &body)))
}

pub async fn write_frame<W>(writer: &mut W, message: &PeerMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    writer.write_all(&frame).await?;
    writer.flush().await
}
