//! Failover coordinator.
//!
//! Each coordinator joins a multicast group. One of them is the master and
//! pings the group every ping interval; the followers announce themselves and
//! watch for the master's pings. When the master has been silent for two ping
//! intervals, every follower independently runs the [`Elector`] over the peers
//! it knows about. The winner starts pinging; the others follow it.
//!
//! This is a liveness signal for redundancy, not consensus: two masters can
//! coexist briefly (or indefinitely after a partition heals), since a master
//! never steps down.

mod receiver;
mod scheduler;
mod state;

use crate::config::{ConfigError, CoordinatorConfig, HostInfo, Role};
use crate::elector::{Elector, HighestHashElector};
use crate::events::CoordinatorListener;
use crate::transport::{MulticastTransport, Transport, TransportError};
use crate::PeerId;
use state::{Lifecycle, Shared};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Coordinator is already running")]
    AlreadyStarted,

    #[error("Coordinator was stopped and cannot be restarted")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// One member of a failover group.
///
/// # Examples
/// ```no_run
/// use failover_core::{Coordinator, CoordinatorConfig, CoordinatorEvent};
/// use std::sync::Arc;
///
/// # async fn run() -> failover_core::coordinator::Result<()> {
/// let coordinator = Coordinator::new(CoordinatorConfig::default())?;
/// coordinator.add_event_listener(Arc::new(|event: &CoordinatorEvent| {
///     println!("{event:?}");
/// }));
/// coordinator.start().await?;
/// // ...
/// coordinator.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a coordinator, resolving this machine's host name and address.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let host = HostInfo::resolve(config.group_address, config.port)?;
        Self::with_host(config, host)
    }

    /// Create a coordinator that advertises `host` in its pings.
    pub fn with_host(config: CoordinatorConfig, host: HostInfo) -> Result<Self> {
        config.validate()?;
        let shared = Shared::new(config, host, Arc::new(HighestHashElector::new()));
        info!(
            "{}: created coordinator {} ({})",
            shared.config.name, shared.id, shared.config.initial_role
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Builder form of [`Coordinator::set_elector`].
    pub fn with_elector(self, elector: Arc<dyn Elector>) -> Self {
        self.set_elector(elector);
        self
    }

    /// Replace the election strategy (default: [`HighestHashElector`]).
    ///
    /// Every coordinator in a group must use the same strategy.
    pub fn set_elector(&self, elector: Arc<dyn Elector>) {
        self.shared.lock().elector = elector;
    }

    /// Join the configured multicast group and start running.
    pub async fn start(&self) -> Result<()> {
        self.check_startable()?;
        let config = &self.shared.config;
        let transport = MulticastTransport::join(
            config.group_address,
            config.port,
            config.interface,
            config.receive_timeout,
        )?;
        self.start_with_transport(Arc::new(transport)).await
    }

    /// Start running over an already-joined transport.
    pub async fn start_with_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut state = self.shared.lock();
        match state.lifecycle {
            Lifecycle::Running => return Err(CoordinatorError::AlreadyStarted),
            Lifecycle::Stopped => return Err(CoordinatorError::Stopped),
            Lifecycle::Idle => {}
        }

        state.lifecycle = Lifecycle::Running;
        state.transport = Some(Arc::clone(&transport));
        state.touch_master_clock();
        state.receiver = Some(tokio::spawn(receiver::run(
            Arc::clone(&self.shared),
            transport,
        )));

        match self.shared.config.initial_role {
            Role::Master => scheduler::enter_master(&self.shared, &mut state),
            Role::Follower => scheduler::enter_follower(&self.shared, &mut state),
        }

        info!(
            "{}: started as {} (peer {})",
            self.shared.config.name, state.role, self.shared.id
        );
        Ok(())
    }

    /// Stop all timers and wait for the receiver loop to exit.
    ///
    /// Returns within roughly one receive timeout. Calling it again (or on a
    /// coordinator that never started) does nothing more. Must not be called
    /// from inside a listener.
    pub async fn stop(&self) {
        let (tasks, receiver) = {
            let mut state = self.shared.lock();
            if state.lifecycle == Lifecycle::Stopped {
                return;
            }
            state.lifecycle = Lifecycle::Stopped;
            state.transport = None;
            (std::mem::take(&mut state.role_tasks), state.receiver.take())
        };

        for task in &tasks {
            task.abort();
        }
        for result in futures::future::join_all(tasks).await {
            match result {
                Err(e) if !e.is_cancelled() => {
                    warn!("{}: periodic task failed: {}", self.shared.config.name, e);
                }
                _ => {}
            }
        }

        if let Some(receiver) = receiver {
            if let Err(e) = receiver.await {
                warn!("{}: receiver task failed: {}", self.shared.config.name, e);
            }
        }

        info!("{}: stopped", self.shared.config.name);
    }

    fn check_startable(&self) -> Result<()> {
        match self.shared.lock().lifecycle {
            Lifecycle::Idle => Ok(()),
            Lifecycle::Running => Err(CoordinatorError::AlreadyStarted),
            Lifecycle::Stopped => Err(CoordinatorError::Stopped),
        }
    }

    /// Register a listener. Takes effect from the next event.
    pub fn add_event_listener(&self, listener: Arc<dyn CoordinatorListener>) {
        self.shared.lock().listeners.push(listener);
    }

    /// Replace all registered listeners.
    pub fn set_event_listeners(&self, listeners: Vec<Arc<dyn CoordinatorListener>>) {
        self.shared.lock().listeners = listeners;
    }

    pub fn is_master(&self) -> bool {
        self.role() == Role::Master
    }

    pub fn role(&self) -> Role {
        self.shared.lock().role
    }

    /// This coordinator's rank among known peers, from `peer_count()` down to 1.
    ///
    /// With the default elector, the peer that would win the next election
    /// ranks 1.
    pub fn rank(&self) -> usize {
        let state = self.shared.lock();
        state.elector.rank(self.shared.id, &state.peers)
    }

    /// Known coordinators, including this one.
    pub fn peer_count(&self) -> usize {
        self.shared.lock().peers.len() + 1
    }

    /// Ids of all known coordinators, including this one.
    pub fn peer_ids(&self) -> HashSet<PeerId> {
        let mut ids = self.shared.lock().peers.clone();
        ids.insert(self.shared.id);
        ids
    }

    /// Who this coordinator currently believes is master.
    pub fn master_id(&self) -> Option<PeerId> {
        self.shared.lock().master_id
    }

    /// Number of times this coordinator has been promoted to master.
    ///
    /// A coordinator configured as master starts at 0.
    pub fn master_epoch(&self) -> u64 {
        self.shared.lock().master_epoch
    }

    pub fn peer_id(&self) -> PeerId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn host(&self) -> &HostInfo {
        &self.shared.host
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.lifecycle = Lifecycle::Stopped;
        state.transport = None;
        for task in state.role_tasks.drain(..) {
            task.abort();
        }
        if let Some(receiver) = state.receiver.take() {
            receiver.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CoordinatorEvent;
    use crate::protocol::{self, Message};
    use crate::transport::{MemoryHub, MemoryTransport};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    const PING: Duration = Duration::from_millis(100);
    const RECEIVE_TIMEOUT: Duration = Duration::from_millis(10);

    fn config(name: &str, role: Role) -> CoordinatorConfig {
        CoordinatorConfig {
            name: name.to_string(),
            ping_interval: PING,
            receive_timeout: RECEIVE_TIMEOUT,
            initial_role: role,
            ..Default::default()
        }
    }

    fn coordinator(name: &str, role: Role) -> Coordinator {
        let host = HostInfo::new(format!("{name}.test"), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        Coordinator::with_host(config(name, role), host).unwrap()
    }

    /// Collects events with the (paused) time they arrived.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Instant, CoordinatorEvent)>>,
    }

    impl Recorder {
        fn count(&self, wanted: &CoordinatorEvent) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| e == wanted)
                .count()
        }

        fn times(&self, wanted: &CoordinatorEvent) -> Vec<Instant> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e)| e == wanted)
                .map(|(t, _)| *t)
                .collect()
        }
    }

    impl CoordinatorListener for Recorder {
        fn became_master(&self) {
            self.events
                .lock()
                .unwrap()
                .push((Instant::now(), CoordinatorEvent::BecameMaster));
        }

        fn master_down(&self) {
            self.events
                .lock()
                .unwrap()
                .push((Instant::now(), CoordinatorEvent::MasterDown));
        }

        fn master_ping_received(&self, ping: &protocol::Ping) {
            self.events
                .lock()
                .unwrap()
                .push((Instant::now(), CoordinatorEvent::from(ping)));
        }
    }

    /// Always elects the same id.
    struct FixedElector(PeerId);

    impl Elector for FixedElector {
        fn determine_new_master(&self, _self_id: PeerId, _peers: &HashSet<PeerId>) -> PeerId {
            self.0
        }

        fn rank(&self, _self_id: PeerId, peers: &HashSet<PeerId>) -> usize {
            peers.len() + 1
        }
    }

    /// Drain everything currently queued on an observer transport.
    async fn drain(observer: &MemoryTransport) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(data) = observer.receive().await.unwrap() {
            messages.push(protocol::decode(&data).unwrap());
        }
        messages
    }

    // ==================== Lifecycle ====================

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_fails() {
        let hub = MemoryHub::new();
        let c = coordinator("c", Role::Follower);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        let err = c
            .start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyStarted));

        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_restartable() {
        let hub = MemoryHub::new();
        let c = coordinator("c", Role::Follower);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        c.stop().await;

        let err = c
            .start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Stopped));
        assert!(matches!(c.start().await, Err(CoordinatorError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let hub = MemoryHub::new();
        let c = coordinator("c", Role::Master);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        c.stop().await;
        c.stop().await;

        let never_started = coordinator("d", Role::Follower);
        never_started.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_traffic_after_stop() {
        let hub = MemoryHub::new();
        let observer = hub.join(RECEIVE_TIMEOUT);
        let c = coordinator("c", Role::Master);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 3).await;
        c.stop().await;
        drain(&observer).await;

        sleep(PING * 10).await;
        assert!(drain(&observer).await.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let host = HostInfo::new("h", IpAddr::V4(Ipv4Addr::LOCALHOST));
        let bad = CoordinatorConfig {
            group_address: Ipv4Addr::new(10, 1, 1, 1),
            ..Default::default()
        };
        assert!(matches!(
            Coordinator::with_host(bad, host),
            Err(CoordinatorError::Configuration(ConfigError::NotMulticast(_)))
        ));
    }

    // ==================== Master ====================

    #[tokio::test(start_paused = true)]
    async fn test_master_pings_with_first_flag_and_epoch() {
        let hub = MemoryHub::new();
        let observer = hub.join(RECEIVE_TIMEOUT);
        let c = coordinator("m", Role::Master);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 3 + PING / 2).await;

        let pings: Vec<_> = drain(&observer)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::Ping(p) => Some(p),
                Message::Announcement(_) => None,
            })
            .collect();

        assert!(pings.len() >= 3, "expected at least 3 pings, got {}", pings.len());
        assert!(pings[0].is_first_ping);
        assert!(pings[1..].iter().all(|p| !p.is_first_ping));
        // Configured master, never promoted
        assert!(pings.iter().all(|p| p.master_epoch == 0));
        assert!(pings.iter().all(|p| p.sender_id == c.peer_id()));
        assert_eq!(pings[0].sender_host, "m.test");
        assert_eq!(pings[0].sender_address, "10.0.0.1");
        assert!(pings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        assert!(c.is_master());
        assert_eq!(c.master_id(), Some(c.peer_id()));
        assert_eq!(c.master_epoch(), 0);
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_never_reports_master_down() {
        let hub = MemoryHub::new();
        let c = coordinator("m", Role::Master);
        let recorder = Arc::new(Recorder::default());
        c.add_event_listener(recorder.clone());

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 20).await;

        assert_eq!(recorder.count(&CoordinatorEvent::MasterDown), 0);
        assert!(c.is_master());
        c.stop().await;
    }

    // ==================== Follower ====================

    #[tokio::test(start_paused = true)]
    async fn test_follower_announces_immediately_and_periodically() {
        let hub = MemoryHub::new();
        let observer = hub.join(RECEIVE_TIMEOUT);
        let c = coordinator("f", Role::Follower);
        // Keep the follower from promoting itself during the test
        c.set_elector(Arc::new(FixedElector(PeerId::generate())));

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING / 2).await;
        let first = drain(&observer).await;
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], Message::Announcement(a) if a.sender_id == c.peer_id()));

        sleep(PING * 3).await;
        let second = drain(&observer).await;
        assert_eq!(
            second
                .iter()
                .filter(|m| matches!(m, Message::Announcement(_)))
                .count(),
            1
        );

        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_keep_follower_quiet() {
        let hub = MemoryHub::new();
        let fake_master = hub.join(RECEIVE_TIMEOUT);
        let master_id = PeerId::generate();
        let c = coordinator("f", Role::Follower);
        let recorder = Arc::new(Recorder::default());
        c.add_event_listener(recorder.clone());

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        for _ in 0..30 {
            let ping = Message::ping(master_id, false, "fake", "10.9.9.9", 1);
            fake_master.send(&protocol::encode(&ping).unwrap()).await.unwrap();
            sleep(PING).await;
        }

        assert_eq!(recorder.count(&CoordinatorEvent::MasterDown), 0);
        assert!(!c.is_master());
        assert_eq!(c.master_id(), Some(master_id));
        assert!(c.peer_ids().contains(&master_id));
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_follower_promotes_itself() {
        let hub = MemoryHub::new();
        let observer = hub.join(RECEIVE_TIMEOUT);
        let c = coordinator("f", Role::Follower);
        let recorder = Arc::new(Recorder::default());
        c.add_event_listener(recorder.clone());

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 5).await;

        assert_eq!(recorder.count(&CoordinatorEvent::MasterDown), 1);
        assert_eq!(recorder.count(&CoordinatorEvent::BecameMaster), 1);
        assert!(c.is_master());
        assert_eq!(c.master_epoch(), 1);

        let pings: Vec<_> = drain(&observer)
            .await
            .into_iter()
            .filter_map(|m| match m {
                Message::Ping(p) => Some(p),
                Message::Announcement(_) => None,
            })
            .collect();
        assert!(!pings.is_empty());
        assert!(pings[0].is_first_ping);

        // No more master-down reports once master
        sleep(PING * 20).await;
        assert_eq!(recorder.count(&CoordinatorEvent::MasterDown), 1);
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_down_fires_once_per_stale_period() {
        let hub = MemoryHub::new();
        let c = coordinator("f", Role::Follower);
        let elsewhere = PeerId::generate();
        c.set_elector(Arc::new(FixedElector(elsewhere)));
        let recorder = Arc::new(Recorder::default());
        c.add_event_listener(recorder.clone());

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 30).await;

        let times = recorder.times(&CoordinatorEvent::MasterDown);
        assert!(times.len() >= 2, "expected repeated reports, got {}", times.len());
        // Consecutive staleness checks are 2 pings apart; a report on every
        // check would put reports that close together.
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= PING * 4);
        }
        assert_eq!(c.master_id(), Some(elsewhere));
        assert!(!c.is_master());
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_master_removed_from_peers() {
        let hub = MemoryHub::new();
        let fake_master = hub.join(RECEIVE_TIMEOUT);
        let master_id = PeerId::generate();
        let c = coordinator("f", Role::Follower);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        let ping = Message::ping(master_id, true, "fake", "10.9.9.9", 1);
        fake_master.send(&protocol::encode(&ping).unwrap()).await.unwrap();
        sleep(PING / 2).await;
        assert_eq!(c.peer_count(), 2);

        sleep(PING * 6).await;
        assert!(!c.peer_ids().contains(&master_id));
        assert_eq!(c.peer_count(), 1);
        assert!(c.is_master());
        c.stop().await;
    }

    // ==================== Receiver ====================

    #[tokio::test(start_paused = true)]
    async fn test_receiver_ends_on_transport_failure() {
        let hub = MemoryHub::new();
        let transport = Arc::new(hub.join(RECEIVE_TIMEOUT));
        let c = coordinator("f", Role::Master);

        c.start_with_transport(transport.clone()).await.unwrap();
        transport.fail_receives();
        sleep(PING).await;

        // Announcement after the failure goes unheard
        let newcomer = PeerId::generate();
        hub.inject(&protocol::encode(&Message::announcement(newcomer)).unwrap());
        sleep(PING).await;
        assert_eq!(c.peer_count(), 1);

        // Timers keep running and stop still returns
        assert!(c.is_master());
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_added_while_running() {
        let hub = MemoryHub::new();
        let fake_master = hub.join(RECEIVE_TIMEOUT);
        let c = coordinator("f", Role::Follower);
        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        c.add_event_listener(Arc::new(move |event: &CoordinatorEvent| {
            seen_clone.lock().unwrap().push(event.clone());
        }));

        let ping = Message::ping(PeerId::generate(), true, "fake", "10.9.9.9", 5);
        fake_master.send(&protocol::encode(&ping).unwrap()).await.unwrap();
        sleep(PING / 2).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(
            &seen[0],
            CoordinatorEvent::MasterPingReceived { master_epoch: 5, is_first_ping: true, .. }
        ));
        drop(seen);
        c.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_event_listeners_replaces() {
        let hub = MemoryHub::new();
        let c = coordinator("f", Role::Follower);
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        c.add_event_listener(first.clone());
        c.set_event_listeners(vec![second.clone()]);

        c.start_with_transport(Arc::new(hub.join(RECEIVE_TIMEOUT))).await.unwrap();
        sleep(PING * 5).await;

        assert_eq!(first.count(&CoordinatorEvent::BecameMaster), 0);
        assert_eq!(second.count(&CoordinatorEvent::BecameMaster), 1);
        c.stop().await;
    }

    #[test]
    fn test_rank_and_peer_count_alone() {
        let c = coordinator("solo", Role::Follower);
        assert_eq!(c.peer_count(), 1);
        assert_eq!(c.rank(), 1);
        assert_eq!(c.peer_ids(), HashSet::from([c.peer_id()]));
        assert_eq!(c.name(), "solo");
        assert_eq!(c.master_epoch(), 0);
    }
}
