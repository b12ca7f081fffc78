//! failover-core: master election and heartbeat failover over IP multicast.
//!
//! This crate provides:
//! - A coordinator that pings as master or watches the master as a follower
//! - Deterministic election of a new master when pings stop
//! - Length + checksum framing for the two group messages
//! - A `Transport` trait with multicast UDP and in-memory implementations

pub mod config;
pub mod coordinator;
pub mod elector;
pub mod events;
pub mod peer_id;
pub mod protocol;
pub mod transport;

pub use config::{ConfigError, CoordinatorConfig, HostInfo, Role};
pub use coordinator::{Coordinator, CoordinatorError};
pub use elector::{Elector, HighestHashElector};
pub use events::{CoordinatorEvent, CoordinatorListener};
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{Announcement, Message, Ping};
pub use transport::{MemoryHub, MemoryTransport, MulticastTransport, Transport, TransportError};
