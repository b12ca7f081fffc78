//! Listener contract for coordinator events.
//!
//! Listeners are called synchronously on the task that observed the event
//! (the receiver loop or a scheduler task). A slow listener delays that
//! task's next iteration, so listeners should hand long work off elsewhere.

use crate::protocol::Ping;
use serde::Serialize;
use std::sync::Arc;

/// Receives failover events. Every method defaults to doing nothing.
pub trait CoordinatorListener: Send + Sync {
    /// This coordinator was elected and now sends pings.
    fn became_master(&self) {}

    /// No ping arrived from the master within the staleness threshold.
    fn master_down(&self) {}

    /// A ping from another coordinator arrived.
    fn master_ping_received(&self, _ping: &Ping) {}
}

/// Value form of a listener callback, for closure listeners and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoordinatorEvent {
    BecameMaster,
    MasterDown,
    MasterPingReceived {
        #[serde(rename = "senderId")]
        sender_id: String,
        #[serde(rename = "senderHost")]
        sender_host: String,
        #[serde(rename = "senderAddress")]
        sender_address: String,
        #[serde(rename = "masterEpoch")]
        master_epoch: u64,
        #[serde(rename = "isFirstPing")]
        is_first_ping: bool,
        timestamp: u64,
    },
}

impl From<&Ping> for CoordinatorEvent {
    fn from(ping: &Ping) -> Self {
        Self::MasterPingReceived {
            sender_id: ping.sender_id.to_string(),
            sender_host: ping.sender_host.clone(),
            sender_address: ping.sender_address.clone(),
            master_epoch: ping.master_epoch,
            is_first_ping: ping.is_first_ping,
            timestamp: ping.timestamp,
        }
    }
}

impl<F> CoordinatorListener for F
where
    F: Fn(&CoordinatorEvent) + Send + Sync,
{
    fn became_master(&self) {
        self(&CoordinatorEvent::BecameMaster);
    }

    fn master_down(&self) {
        self(&CoordinatorEvent::MasterDown);
    }

    fn master_ping_received(&self, ping: &Ping) {
        self(&CoordinatorEvent::from(ping));
    }
}

pub(crate) type ListenerList = Vec<Arc<dyn CoordinatorListener>>;

/// Call every listener in a snapshot taken by the caller.
pub(crate) fn dispatch(listeners: &[Arc<dyn CoordinatorListener>], f: impl Fn(&dyn CoordinatorListener)) {
    for listener in listeners {
        f(listener.as_ref());
    }
}
