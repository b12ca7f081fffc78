//! Listener that reports coordinator events through `tracing`.

use failover_core::protocol::Ping;
use failover_core::{CoordinatorEvent, CoordinatorListener};
use tracing::{info, warn};

/// Logs every event, and optionally prints it as one JSON line on stdout.
pub struct LogListener {
    name: String,
    json: bool,
}

impl LogListener {
    pub fn new(name: impl Into<String>, json: bool) -> Self {
        Self {
            name: name.into(),
            json,
        }
    }

    /// JSON line for `event`, if JSON output is on.
    pub fn render(&self, event: &CoordinatorEvent) -> Option<String> {
        if !self.json {
            return None;
        }
        match serde_json::to_string(event) {
            Ok(line) => Some(line),
            Err(e) => {
                warn!("{}: failed to serialize event: {}", self.name, e);
                None
            }
        }
    }

    fn emit(&self, event: &CoordinatorEvent) {
        if let Some(line) = self.render(event) {
            println!("{line}");
        }
    }
}

impl CoordinatorListener for LogListener {
    fn became_master(&self) {
        info!("{}: now master", self.name);
        self.emit(&CoordinatorEvent::BecameMaster);
    }

    fn master_down(&self) {
        warn!("{}: master down", self.name);
        self.emit(&CoordinatorEvent::MasterDown);
    }

    fn master_ping_received(&self, ping: &Ping) {
        if ping.is_first_ping {
            info!(
                "{}: new master {} at {} ({}), epoch {}",
                self.name, ping.sender_id, ping.sender_host, ping.sender_address, ping.master_epoch
            );
        }
        self.emit(&CoordinatorEvent::from(ping));
    }
}
