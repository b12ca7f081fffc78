//! Deterministic master election.
//!
//! Every follower runs the election on its own when the master goes quiet.
//! There is no vote exchange, so agreement relies on the strategy being a
//! pure function of the peer-id set: two peers that see the same set must
//! pick the same winner.

use crate::PeerId;
use std::collections::{BTreeMap, HashSet};

/// Strategy used to choose the next master and to rank coordinators.
pub trait Elector: Send + Sync {
    /// Pick the next master from `peers ∪ {self_id}`.
    fn determine_new_master(&self, self_id: PeerId, peers: &HashSet<PeerId>) -> PeerId;

    /// Position of `self_id` among `peers ∪ {self_id}`, from `peers.len() + 1`
    /// down to 1.
    fn rank(&self, self_id: PeerId, peers: &HashSet<PeerId>) -> usize;
}

/// Elects the id with the numerically highest [`PeerId::stable_hash`].
///
/// Distinct ids whose hashes collide occupy a single slot; the id written
/// last wins the slot (`self_id` is always written last). A 64-bit collision
/// is unlikely enough that this is accepted rather than resolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct HighestHashElector;

impl HighestHashElector {
    pub fn new() -> Self {
        Self
    }

    fn ordered(&self, self_id: PeerId, peers: &HashSet<PeerId>) -> BTreeMap<u64, PeerId> {
        let mut by_hash: BTreeMap<u64, PeerId> =
            peers.iter().map(|id| (id.stable_hash(), *id)).collect();
        by_hash.insert(self_id.stable_hash(), self_id);
        by_hash
    }
}

impl Elector for HighestHashElector {
    fn determine_new_master(&self, self_id: PeerId, peers: &HashSet<PeerId>) -> PeerId {
        self.ordered(self_id, peers)
            .into_values()
            .next_back()
            .unwrap_or(self_id)
    }

    fn rank(&self, self_id: PeerId, peers: &HashSet<PeerId>) -> usize {
        let ordered = self.ordered(self_id, peers);
        let self_hash = self_id.stable_hash();

        // Counted down along ascending hash order: the lowest hash ranks
        // highest, the election winner ranks 1
        ordered
            .keys()
            .position(|hash| *hash == self_hash)
            .map(|p| ordered.len() - p)
            .unwrap_or(1)
    }
}
