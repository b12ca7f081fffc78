//! Role state machine and the periodic tasks each role owns.
//!
//! - **Follower**: announcement task + staleness-check task
//! - **Master**: ping task
//!
//! Tasks are started by the enter hooks and aborted by [`exit_role`], so no
//! other code schedules or cancels timers.

use super::state::{CoordinatorState, Shared};
use crate::config::Role;
use crate::events;
use crate::protocol::{self, Message};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Start following: announce now and periodically, and watch the master.
pub(crate) fn enter_follower(shared: &Arc<Shared>, state: &mut CoordinatorState) {
    let Some(transport) = state.transport.clone() else {
        return;
    };

    state.role = Role::Follower;
    state.touch_master_clock();
    state
        .role_tasks
        .push(tokio::spawn(announcement_task(Arc::clone(shared), Arc::clone(&transport))));
    state
        .role_tasks
        .push(tokio::spawn(staleness_task(Arc::clone(shared))));
}

/// Start mastering: ping now and periodically.
///
/// The epoch is left alone; only a promotion increments it.
pub(crate) fn enter_master(shared: &Arc<Shared>, state: &mut CoordinatorState) {
    let Some(transport) = state.transport.clone() else {
        return;
    };

    state.role = Role::Master;
    state.master_id = Some(shared.id);
    state.first_ping = true;
    state
        .role_tasks
        .push(tokio::spawn(ping_task(Arc::clone(shared), transport)));
}

/// Abort every task owned by the current role.
pub(crate) fn exit_role(state: &mut CoordinatorState) {
    for task in state.role_tasks.drain(..) {
        task.abort();
    }
}

async fn ping_task(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    let mut ticker = interval(shared.config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let message = {
            let mut state = shared.lock();
            if !state.is_running() {
                return;
            }
            let first = std::mem::replace(&mut state.first_ping, false);
            Message::ping(
                shared.id,
                first,
                shared.host.hostname.clone(),
                shared.host.address.to_string(),
                state.master_epoch,
            )
        };

        broadcast(&shared, transport.as_ref(), &message).await;
    }
}

async fn announcement_task(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    let mut ticker = interval(shared.config.announcement_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let running = shared.lock().is_running();
        if !running {
            return;
        }
        broadcast(&shared, transport.as_ref(), &Message::announcement(shared.id)).await;
    }
}

async fn staleness_task(shared: Arc<Shared>) {
    let period = shared.config.staleness_check_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if check_master(&shared) == CheckOutcome::Finished {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckOutcome {
    /// Keep checking.
    Continue,
    /// We became master or stopped; the check task is done.
    Finished,
}

/// One staleness check. On a stale master: notify, elect, maybe promote.
pub(crate) fn check_master(shared: &Arc<Shared>) -> CheckOutcome {
    let threshold = shared.config.master_down_after();

    let listeners = {
        let state = shared.lock();
        if !state.is_running() || state.role != Role::Follower {
            return CheckOutcome::Finished;
        }
        if !state.master_is_stale(threshold) {
            return CheckOutcome::Continue;
        }
        match state.master_id {
            Some(master) => warn!(
                "{}: no ping from master {} for over {:?}",
                shared.config.name, master, threshold
            ),
            None => warn!(
                "{}: no master ping for over {:?}",
                shared.config.name, threshold
            ),
        }
        state.listeners.clone()
    };

    events::dispatch(&listeners, |l| l.master_down());

    let promoted = {
        let mut state = shared.lock();
        if !state.is_running() {
            return CheckOutcome::Finished;
        }

        if let Some(dead) = state.master_id.take() {
            state.peers.remove(&dead);
        }
        let winner = state.elector.determine_new_master(shared.id, &state.peers);

        if winner == shared.id {
            exit_role(&mut state);
            state.master_epoch += 1;
            enter_master(shared, &mut state);
            info!(
                "{}: became master (epoch {}, {} peer(s))",
                shared.config.name,
                state.master_epoch,
                state.peers.len()
            );
            Some(state.listeners.clone())
        } else {
            info!("{}: elected {} as the new master", shared.config.name, winner);
            state.master_id = Some(winner);
            state.touch_master_clock();
            state.election_grace = shared.config.staleness_check_interval();
            None
        }
    };

    match promoted {
        Some(listeners) => {
            events::dispatch(&listeners, |l| l.became_master());
            CheckOutcome::Finished
        }
        None => CheckOutcome::Continue,
    }
}

async fn broadcast(shared: &Shared, transport: &dyn Transport, message: &Message) {
    let frame = match protocol::encode(message) {
        Ok(frame) => frame,
        Err(e) => {
            error!("{}: failed to encode {:?}: {}", shared.config.name, message.kind(), e);
            return;
        }
    };

    match transport.send(&frame).await {
        Ok(()) => debug!(
            "{}: sent {:?} ({} bytes)",
            shared.config.name,
            message.kind(),
            frame.len()
        ),
        Err(e) => warn!(
            "{}: failed to send {:?}, retrying next cycle: {}",
            shared.config.name,
            message.kind(),
            e
        ),
    }
}
