//! Wire protocol for coordinator traffic.
//!
//! - Message variants exchanged on the multicast group
//! - Length + checksum framing around each serialized message

pub mod frame;
pub mod message;

pub use frame::{decode, encode, CodecError, HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{next_timestamp, Announcement, Message, MessageKind, Ping, Timestamp};
