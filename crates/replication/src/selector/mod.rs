//! Copyset selector abstractions.
//!
//! A selector turns a storage set plus live shard health into one valid
//! copyset per call. Different selectors serve different replication shapes:
//!
//! - **LinearSelector**: `r` distinct nodes, no failure-domain spreading
//! - **CrossDomainSelector**: one copy in each of `r` domains at one scope
//! - **WeightedSelector**: any mix of scopes, weight-proportional load

pub mod cross_domain;
pub mod linear;
pub mod weighted;

pub use cross_domain::CrossDomainSelector;
pub use linear::LinearSelector;
pub use weighted::WeightedSelector;

use std::sync::Arc;

use corelib::{NodeSetState, ShardId};
use rand::Rng;

use crate::copyset::CopySet;
use crate::error::SelectionError;

/// Contract shared by every selection strategy.
///
/// # Guarantees
///
/// A successful call returns exactly `replication_factor()` distinct shards,
/// all writable according to the selector's `NodeSetState` at call time.
/// Given the same health and an identically seeded RNG, the result is the same.
///
/// Calls for one instance are serialized by the owning worker; health may
/// change between two calls.
pub trait CopySetSelector {
    /// Number of shards in every copyset this selector returns.
    fn replication_factor(&self) -> usize;

    /// Select a copyset.
    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError>;

    /// Health tracker the selector reads.
    fn nodeset_state(&self) -> &Arc<NodeSetState>;

    /// Strategy name (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// A selector built by the factory for one epoch.
#[derive(Debug)]
pub enum Selector {
    Linear(LinearSelector),
    CrossDomain(CrossDomainSelector),
    Weighted(WeightedSelector),
}

impl CopySetSelector for Selector {
    fn replication_factor(&self) -> usize {
        match self {
            Selector::Linear(s) => s.replication_factor(),
            Selector::CrossDomain(s) => s.replication_factor(),
            Selector::Weighted(s) => s.replication_factor(),
        }
    }

    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        match self {
            Selector::Linear(s) => s.select(rng),
            Selector::CrossDomain(s) => s.select(rng),
            Selector::Weighted(s) => s.select(rng),
        }
    }

    fn nodeset_state(&self) -> &Arc<NodeSetState> {
        match self {
            Selector::Linear(s) => s.nodeset_state(),
            Selector::CrossDomain(s) => s.nodeset_state(),
            Selector::Weighted(s) => s.nodeset_state(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Selector::Linear(s) => s.name(),
            Selector::CrossDomain(s) => s.name(),
            Selector::Weighted(s) => s.name(),
        }
    }
}

/// Writable candidates split by preference.
#[derive(Debug, Default)]
pub(crate) struct HealthSplit {
    /// Writable with no soft-avoid flag.
    pub ideal: Vec<ShardId>,
    /// Writable but flagged (slow, overloaded, ...).
    pub soft: Vec<ShardId>,
}

impl HealthSplit {
    pub fn new<'a>(candidates: impl IntoIterator<Item = &'a ShardId>, state: &NodeSetState) -> Self {
        let mut split = HealthSplit::default();
        for shard in candidates {
            match state.get(*shard) {
                Some(reason) if reason.is_ideal() => split.ideal.push(*shard),
                Some(reason) if reason.is_writable() => split.soft.push(*shard),
                _ => {}
            }
        }
        split
    }

    pub fn writable(&self) -> usize {
        self.ideal.len() + self.soft.len()
    }

    /// Pick one shard uniformly, preferring ideal ones.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ShardId> {
        let pool = if self.ideal.is_empty() { &self.soft } else { &self.ideal };
        if pool.is_empty() {
            return None;
        }
        Some(pool[rng.gen_range(0..pool.len())])
    }
}
