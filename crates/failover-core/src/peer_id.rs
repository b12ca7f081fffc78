//! PeerId: Unique identifier for a coordinator in the failover group.
//!
//! Wraps a random 128-bit UUID and displays as the usual hyphenated form.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: {0}")]
    InvalidFormat(#[from] uuid::Error),
}

/// A unique identifier for one coordinator instance.
///
/// Generated once when the coordinator is constructed and never reused.
///
/// # Examples
/// ```
/// use failover_core::PeerId;
///
/// let peer_id = PeerId::generate();
/// let parsed: PeerId = peer_id.to_string().parse().unwrap();
/// assert_eq!(peer_id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generate a new random peer ID (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Hash of the id that is identical on every platform and every process.
    ///
    /// Elections depend on all peers computing the same value, so this must
    /// not use `DefaultHasher` (randomly seeded per process).
    pub fn stable_hash(&self) -> u64 {
        fnv1a_hash(self.0.as_bytes())
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<u128> for PeerId {
    fn from(id: u128) -> Self {
        Self(Uuid::from_u128(id))
    }
}

impl From<PeerId> for u128 {
    fn from(peer_id: PeerId) -> u128 {
        peer_id.as_u128()
    }
}

/// FNV-1a, 64-bit.
fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
