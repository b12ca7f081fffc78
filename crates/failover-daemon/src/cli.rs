//! Command-line arguments.

use clap::Parser;
use failover_core::{CoordinatorConfig, Role};
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "failover-daemon")]
#[command(about = "Multicast master election and heartbeat failover")]
pub struct Args {
    /// Multicast group shared by all coordinators
    #[arg(short, long, default_value = "239.255.77.77")]
    pub group: Ipv4Addr,

    /// Group port
    #[arg(short, long, default_value_t = 4446)]
    pub port: u16,

    /// Local interface address used to join the group
    #[arg(long, default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Milliseconds between master pings
    #[arg(long, default_value_t = 5000)]
    pub ping_interval_ms: u64,

    /// Milliseconds a single receive may block
    #[arg(long, default_value_t = 50)]
    pub receive_timeout_ms: u64,

    /// Start as master instead of follower
    #[arg(long)]
    pub master: bool,

    /// Name used in logs
    #[arg(short, long, default_value = "Coordinator")]
    pub name: String,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Print each event as a JSON line on stdout
    #[arg(long)]
    pub json_events: bool,
}

impl Args {
    pub fn to_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            name: self.name.clone(),
            group_address: self.group,
            port: self.port,
            interface: self.interface,
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            initial_role: if self.master {
                Role::Master
            } else {
                Role::Follower
            },
        }
    }
}
