//! Receiver loop: drains the transport and applies incoming messages.

use super::state::Shared;
use crate::config::Role;
use crate::events;
use crate::protocol::{self, Message};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs until the coordinator stops or the transport fails.
///
/// Undecodable datagrams are dropped. A receive error ends the loop for
/// good; the coordinator keeps its timers but hears nothing more.
pub(crate) async fn run(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    debug!("{}: receiver started", shared.config.name);

    loop {
        let running = shared.lock().is_running();
        if !running {
            break;
        }

        let data = match transport.receive().await {
            Ok(Some(data)) => data,
            Ok(None) => continue,
            Err(e) => {
                error!(
                    "{}: receive failed, no longer listening for peers: {}",
                    shared.config.name, e
                );
                return;
            }
        };

        match protocol::decode(&data) {
            Ok(message) => handle_message(&shared, message),
            Err(e) => warn!(
                "{}: dropping datagram ({} bytes): {}",
                shared.config.name,
                data.len(),
                e
            ),
        }
    }

    debug!("{}: receiver stopped", shared.config.name);
}

/// Apply one decoded message to the shared state and notify listeners.
pub(crate) fn handle_message(shared: &Shared, message: Message) {
    let sender = message.sender_id();

    // Loopback is enabled, so our own datagrams come back
    if sender == shared.id {
        return;
    }

    match message {
        Message::Ping(ping) => {
            debug!(
                "{}: ping from {} (epoch {}, first={})",
                shared.config.name, sender, ping.master_epoch, ping.is_first_ping
            );

            let listeners = {
                let mut state = shared.lock();
                if !state.is_running() {
                    return;
                }

                state.touch_master_clock();
                if state.add_peer(shared.id, sender) {
                    info!("{}: discovered peer {} (via ping)", shared.config.name, sender);
                }

                match state.role {
                    Role::Follower => {
                        if state.master_id != Some(sender) {
                            info!(
                                "{}: following master {} at {} ({})",
                                shared.config.name, sender, ping.sender_host, ping.sender_address
                            );
                            state.master_id = Some(sender);
                        }
                    }
                    Role::Master => {
                        warn!(
                            "{}: ping from {} while master (our epoch {}, theirs {})",
                            shared.config.name, sender, state.master_epoch, ping.master_epoch
                        );
                    }
                }

                state.listeners.clone()
            };

            events::dispatch(&listeners, |l| l.master_ping_received(&ping));
        }
        Message::Announcement(_) => {
            let mut state = shared.lock();
            if state.add_peer(shared.id, sender) {
                info!(
                    "{}: discovered peer {} ({} known)",
                    shared.config.name,
                    sender,
                    state.peers.len()
                );
            }
        }
    }
}
