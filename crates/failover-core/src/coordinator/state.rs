//! Shared coordinator state.
//!
//! Every mutable field lives in [`CoordinatorState`] behind one mutex. The
//! receiver loop, the scheduler tasks and the public API all go through
//! [`Shared::lock`]. The guard is never held across an `.await` or while
//! listeners run.

use crate::config::{CoordinatorConfig, HostInfo, Role};
use crate::elector::Elector;
use crate::events::ListenerList;
use crate::transport::Transport;
use crate::PeerId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

pub(crate) struct CoordinatorState {
    pub role: Role,
    /// Who we believe the master is (self when master).
    pub master_id: Option<PeerId>,
    /// Last ping from the master, or the instant the clock was reset.
    pub last_master_ping_at: Instant,
    /// Extra silence allowed before the master counts as down.
    ///
    /// Set after electing another peer, which may still be a check period
    /// away from noticing it won. Cleared by any ping.
    pub election_grace: Duration,
    /// Promotions to master; a configured master starts at 0.
    pub master_epoch: u64,
    /// Next ping is the first since becoming master.
    pub first_ping: bool,
    /// Known peers, never containing self.
    pub peers: HashSet<PeerId>,
    pub listeners: ListenerList,
    pub elector: Arc<dyn Elector>,
    pub lifecycle: Lifecycle,
    pub transport: Option<Arc<dyn Transport>>,
    /// Periodic tasks owned by the current role.
    pub role_tasks: Vec<JoinHandle<()>>,
    pub receiver: Option<JoinHandle<()>>,
}

impl CoordinatorState {
    pub fn new(role: Role, elector: Arc<dyn Elector>) -> Self {
        Self {
            role,
            master_id: None,
            last_master_ping_at: Instant::now(),
            election_grace: Duration::ZERO,
            master_epoch: 0,
            first_ping: true,
            peers: HashSet::new(),
            listeners: Vec::new(),
            elector,
            lifecycle: Lifecycle::Idle,
            transport: None,
            role_tasks: Vec::new(),
            receiver: None,
        }
    }

    /// Record `id` as a peer. Returns true if it was not known before.
    pub fn add_peer(&mut self, self_id: PeerId, id: PeerId) -> bool {
        id != self_id && self.peers.insert(id)
    }

    /// Note a sign of life from the master.
    pub fn touch_master_clock(&mut self) {
        self.last_master_ping_at = Instant::now();
        self.election_grace = Duration::ZERO;
    }

    /// True once the master has been silent past `threshold` (plus grace).
    pub fn master_is_stale(&self, threshold: Duration) -> bool {
        Instant::now().saturating_duration_since(self.last_master_ping_at)
            > threshold + self.election_grace
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }
}

/// Immutable identity plus the locked state, shared by all tasks.
pub(crate) struct Shared {
    pub id: PeerId,
    pub config: CoordinatorConfig,
    pub host: HostInfo,
    state: Mutex<CoordinatorState>,
}

impl Shared {
    pub fn new(config: CoordinatorConfig, host: HostInfo, elector: Arc<dyn Elector>) -> Self {
        let state = CoordinatorState::new(config.initial_role, elector);
        Self {
            id: PeerId::generate(),
            config,
            host,
            state: Mutex::new(state),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
