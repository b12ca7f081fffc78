//! Checksummed datagram framing.
//!
//! Frame format: `[payload_size:2][checksum:8][payload:N]`
//!
//! - **payload_size**: Payload length in bytes (big-endian u16)
//! - **checksum**: CRC-32 (IEEE, as in zlib) of the payload, zero-extended
//!   (big-endian u64)
//! - **payload**: `[kind:1][body]`, body is the bincode-encoded variant
//!
//! Multicast gives no delivery, ordering or integrity guarantees, so every
//! datagram carries its own length and checksum.

use super::message::{Announcement, Message, MessageKind, Ping};
use thiserror::Error;

/// Header size: 2 (payload size) + 8 (checksum) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Largest payload the u16 size field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Largest datagram a frame can occupy.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload does not fit the 16-bit size field.
    #[error("payload too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge { size: usize },

    /// Fewer bytes arrived than the header declares.
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Framing { expected: usize, received: usize },

    #[error("checksum mismatch: header {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("malformed payload: {0}")]
    Deserialization(String),

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Fixed-size header preceding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_size: u16,
    pub checksum: u64,
}

impl FrameHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.payload_size.to_be_bytes());
        buf[2..10].copy_from_slice(&self.checksum.to_be_bytes());
    }

    /// Deserialize header from buffer.
    pub fn deserialize(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::Framing {
                expected: HEADER_SIZE,
                received: buf.len(),
            });
        }

        let payload_size = u16::from_be_bytes([buf[0], buf[1]]);
        let checksum = u64::from_be_bytes([
            buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
        ]);

        Ok(Self {
            payload_size,
            checksum,
        })
    }
}

/// IEEE CRC-32 of the payload in the 64-bit header field.
pub fn checksum(payload: &[u8]) -> u64 {
    crc32fast::hash(payload) as u64
}

/// Encode a message into a complete frame.
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the serialized message exceeds 65535 bytes.
///
/// # Examples
///
/// ```
/// use failover_core::protocol::{decode, encode, Message};
/// use failover_core::PeerId;
///
/// let msg = Message::announcement(PeerId::generate());
/// let frame = encode(&msg).expect("encode");
/// assert_eq!(decode(&frame).expect("decode"), msg);
/// ```
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let body = match message {
        Message::Announcement(a) => bincode::serialize(a)?,
        Message::Ping(p) => bincode::serialize(p)?,
    };

    let payload_size = 1 + body.len();
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge { size: payload_size });
    }

    let mut frame = vec![0u8; HEADER_SIZE + payload_size];
    frame[HEADER_SIZE] = message.kind() as u8;
    frame[HEADER_SIZE + 1..].copy_from_slice(&body);

    let header = FrameHeader {
        payload_size: payload_size as u16,
        checksum: checksum(&frame[HEADER_SIZE..]),
    };
    header.serialize_into(&mut frame[..HEADER_SIZE]);

    Ok(frame)
}

/// Decode a received datagram, validating length and checksum.
///
/// Bytes past the declared payload are ignored.
///
/// # Errors
///
/// - `Framing`: header missing or payload shorter than declared
/// - `ChecksumMismatch`: payload was corrupted
/// - `Deserialization`: unknown kind byte or malformed fields
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    let header = FrameHeader::deserialize(data)?;

    let declared = header.payload_size as usize;
    let received = data.len() - HEADER_SIZE;
    if received < declared {
        return Err(CodecError::Framing {
            expected: declared,
            received,
        });
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + declared];
    let actual = checksum(payload);
    if actual != header.checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let (&kind_byte, body) = payload
        .split_first()
        .ok_or_else(|| CodecError::Deserialization("empty payload".into()))?;

    let kind = MessageKind::from_byte(kind_byte).ok_or_else(|| {
        CodecError::Deserialization(format!("unknown message kind {kind_byte:#04x}"))
    })?;

    let message = match kind {
        MessageKind::Announcement => Message::Announcement(
            bincode::deserialize::<Announcement>(body)
                .map_err(|e| CodecError::Deserialization(e.to_string()))?,
        ),
        MessageKind::Ping => Message::Ping(
            bincode::deserialize::<Ping>(body)
                .map_err(|e| CodecError::Deserialization(e.to_string()))?,
        ),
    };

    Ok(message)
}
