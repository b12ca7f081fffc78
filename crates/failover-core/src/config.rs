//! Coordinator configuration.

use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Group address {0} is not an IPv4 multicast address")]
    NotMulticast(Ipv4Addr),

    #[error("Port must be non-zero")]
    ZeroPort,

    #[error("Ping interval must be non-zero")]
    ZeroPingInterval,

    #[error("Receive timeout must be non-zero")]
    ZeroReceiveTimeout,

    #[error("Receive timeout ({receive_timeout:?}) must be shorter than the ping interval ({ping_interval:?})")]
    ReceiveTimeoutTooLong {
        receive_timeout: Duration,
        ping_interval: Duration,
    },

    #[error("Host name is not valid UTF-8: {0:?}")]
    InvalidHostName(OsString),

    #[error("Could not resolve host name {hostname}: {source}")]
    Resolve {
        hostname: String,
        #[source]
        source: io::Error,
    },

    #[error("Host name {0} has no IPv4 address")]
    NoIpv4Address(String),
}

/// Which side of the failover pair a coordinator is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    Master,
    #[default]
    Follower,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// Configuration for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Label used in logs and task names (default: "Coordinator")
    pub name: String,
    /// Multicast group shared by all coordinators (default: 239.255.77.77)
    pub group_address: Ipv4Addr,
    /// Group port (default: 4446)
    pub port: u16,
    /// Local interface used to join the group (default: any)
    pub interface: Ipv4Addr,
    /// Time between master pings (default: 5s)
    pub ping_interval: Duration,
    /// Upper bound on a single blocking receive (default: 50ms)
    pub receive_timeout: Duration,
    /// Role taken at start (default: follower)
    pub initial_role: Role,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: "Coordinator".to_string(),
            group_address: Ipv4Addr::new(239, 255, 77, 77),
            port: 4446,
            interface: Ipv4Addr::UNSPECIFIED,
            ping_interval: Duration::from_secs(5),
            receive_timeout: Duration::from_millis(50),
            initial_role: Role::Follower,
        }
    }
}

impl CoordinatorConfig {
    /// Time without a ping after which the master is considered down.
    pub fn master_down_after(&self) -> Duration {
        self.ping_interval * 2
    }

    /// Period of the follower staleness check.
    pub fn staleness_check_interval(&self) -> Duration {
        self.ping_interval * 2
    }

    /// Period of follower announcements.
    pub fn announcement_interval(&self) -> Duration {
        self.ping_interval * 3
    }

    /// Check the values a coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.group_address.is_multicast() {
            return Err(ConfigError::NotMulticast(self.group_address));
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.receive_timeout.is_zero() {
            return Err(ConfigError::ZeroReceiveTimeout);
        }
        if self.receive_timeout >= self.ping_interval {
            return Err(ConfigError::ReceiveTimeoutTooLong {
                receive_timeout: self.receive_timeout,
                ping_interval: self.ping_interval,
            });
        }
        Ok(())
    }
}

/// Host name and address advertised in pings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub address: IpAddr,
}

impl HostInfo {
    pub fn new(hostname: impl Into<String>, address: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            address,
        }
    }

    /// Look up this machine's host name and an IPv4 address for it.
    ///
    /// The name is resolved first; if it only maps to loopback, the address
    /// the OS would route `group` traffic from is used instead.
    pub fn resolve(group: Ipv4Addr, port: u16) -> Result<Self, ConfigError> {
        let hostname = gethostname::gethostname()
            .into_string()
            .map_err(ConfigError::InvalidHostName)?;

        let resolved: Vec<IpAddr> = (hostname.as_str(), 0)
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                hostname: hostname.clone(),
                source,
            })?
            .map(|addr| addr.ip())
            .filter(IpAddr::is_ipv4)
            .collect();

        let address = resolved
            .iter()
            .copied()
            .find(|ip| !ip.is_loopback())
            .or_else(|| routed_address(group, port))
            .or_else(|| resolved.first().copied())
            .ok_or_else(|| ConfigError::NoIpv4Address(hostname.clone()))?;

        Ok(Self { hostname, address })
    }
}

/// Source address the OS picks for traffic to `group`. Nothing is sent.
fn routed_address(group: Ipv4Addr, port: u16) -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((group, port)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
