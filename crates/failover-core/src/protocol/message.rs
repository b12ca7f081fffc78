//! Coordinator message types.
//!
//! Two variants travel on the multicast group: followers send
//! [`Announcement`]s so the group learns they exist, and the master sends
//! [`Ping`]s as its heartbeat.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds, never smaller than a previously returned value.
pub fn next_timestamp() -> Timestamp {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let next = wall.max(last);
        match LAST_TIMESTAMP.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

/// "I am part of the group" broadcast from a follower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub sender_id: PeerId,
    pub timestamp: Timestamp,
}

/// Heartbeat broadcast from the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub sender_id: PeerId,
    pub timestamp: Timestamp,
    /// True only for the first ping after the sender became master.
    pub is_first_ping: bool,
    /// Host name of the master.
    pub sender_host: String,
    /// IP address of the master, as text.
    pub sender_address: String,
    /// How many times the sender has become master.
    pub master_epoch: u64,
}

/// Wire discriminator for each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Announcement = 0x01,
    Ping = 0x02,
}

impl MessageKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Announcement),
            0x02 => Some(Self::Ping),
            _ => None,
        }
    }
}

/// Every message the coordinator protocol knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Announcement(Announcement),
    Ping(Ping),
}

impl Message {
    /// Create an announcement stamped with the current time.
    pub fn announcement(sender_id: PeerId) -> Self {
        Self::Announcement(Announcement {
            sender_id,
            timestamp: next_timestamp(),
        })
    }

    /// Create a ping stamped with the current time.
    pub fn ping(
        sender_id: PeerId,
        is_first_ping: bool,
        sender_host: impl Into<String>,
        sender_address: impl Into<String>,
        master_epoch: u64,
    ) -> Self {
        Self::Ping(Ping {
            sender_id,
            timestamp: next_timestamp(),
            is_first_ping,
            sender_host: sender_host.into(),
            sender_address: sender_address.into(),
            master_epoch,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Announcement(_) => MessageKind::Announcement,
            Self::Ping(_) => MessageKind::Ping,
        }
    }

    pub fn sender_id(&self) -> PeerId {
        match self {
            Self::Announcement(a) => a.sender_id,
            Self::Ping(p) => p.sender_id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Announcement(a) => a.timestamp,
            Self::Ping(p) => p.timestamp,
        }
    }
}
