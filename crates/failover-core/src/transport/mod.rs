//! Transport trait for group datagram delivery.
//!
//! Implementations:
//! - Multicast: UDP socket joined to an IPv4 multicast group
//! - Memory: in-process broadcast group (tests, simulations)

mod memory;
mod multicast;

pub use memory::{MemoryHub, MemoryTransport};
pub use multicast::MulticastTransport;

use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not a multicast group address: {0}")]
    InvalidGroup(Ipv4Addr),

    #[error("Failed to bind socket: {0}")]
    Bind(#[source] io::Error),

    #[error("Failed to join multicast group {group}: {source}")]
    Join {
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("Send failed: {0}")]
    Send(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Unreliable, unordered delivery of whole datagrams to every group member.
///
/// Senders also receive their own datagrams; callers filter by sender id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to the group.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Wait for the next datagram, at most for the configured receive timeout.
    ///
    /// Returns `Ok(None)` when the timeout expires. An `Err` means the
    /// transport is unusable and the caller should stop receiving.
    async fn receive(&self) -> Result<Option<Vec<u8>>>;
}
