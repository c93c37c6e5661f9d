//! Linear copyset selector.
//!
//! Picks `r` writable shards on `r` distinct nodes uniformly at random, with
//! no failure-domain constraints. Used when the replication property is
//! `{node: r}` or `r == 1`.
//!
//! # Algorithm
//!
//! 1. Split the candidate shards into ideal and soft-avoided writable shards
//! 2. Partial Fisher-Yates over the ideal shards, skipping shards whose node
//!    already holds a copy
//! 3. If that is not enough, continue the same draw over the soft shards
//!
//! Storage-set order never biases the result.
//!
//! # Performance
//!
//! - **Time**: O(n) where n = storage set size (health split dominates)
//! - **Space**: O(n)

use std::collections::HashSet;
use std::sync::Arc;

use corelib::{NodeLocationScope, NodeSetState, ShardId, StorageSet};
use rand::Rng;
use tracing::trace;

use crate::copyset::CopySet;
use crate::error::SelectionError;
use crate::selector::{CopySetSelector, HealthSplit};

#[derive(Debug)]
pub struct LinearSelector {
    replication_factor: usize,
    /// Writable members of the storage set when the epoch was set up.
    shards: StorageSet,
    nodeset_state: Arc<NodeSetState>,
}

impl LinearSelector {
    pub fn new(replication_factor: usize, shards: StorageSet, nodeset_state: Arc<NodeSetState>) -> Self {
        Self {
            replication_factor,
            shards,
            nodeset_state,
        }
    }

    pub fn candidates(&self) -> &[ShardId] {
        &self.shards
    }
}

/// Draw from `pool` without replacement until `chosen` holds `want` shards on
/// distinct nodes or the pool runs dry.
fn draw_distinct_nodes<R: Rng + ?Sized>(
    pool: &mut [ShardId],
    want: usize,
    chosen: &mut Vec<ShardId>,
    rng: &mut R,
) {
    let mut end = pool.len();
    while chosen.len() < want && end > 0 {
        let idx = rng.gen_range(0..end);
        pool.swap(idx, end - 1);
        end -= 1;
        let shard = pool[end];
        if chosen.iter().any(|c| c.node == shard.node) {
            continue;
        }
        chosen.push(shard);
    }
}

impl CopySetSelector for LinearSelector {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        let r = self.replication_factor;
        let mut split = HealthSplit::new(&self.shards, &self.nodeset_state);
        if split.writable() < r {
            return Err(SelectionError::InsufficientWritableShards {
                required: r,
                available: split.writable(),
            });
        }

        let mut chosen = Vec::with_capacity(r);
        draw_distinct_nodes(&mut split.ideal, r, &mut chosen, rng);
        if chosen.len() < r {
            trace!(ideal = chosen.len(), required = r, "falling back to soft-avoided shards");
            draw_distinct_nodes(&mut split.soft, r, &mut chosen, rng);
        }

        if chosen.len() < r {
            let nodes: HashSet<_> = split.ideal.iter().chain(&split.soft).map(|s| s.node).collect();
            return Err(SelectionError::InsufficientDomains {
                scope: NodeLocationScope::Node,
                required: r,
                available: nodes.len(),
            });
        }
        Ok(CopySet::new(chosen))
    }

    fn nodeset_state(&self) -> &Arc<NodeSetState> {
        &self.nodeset_state
    }

    fn name(&self) -> &'static str {
        "LinearSelector"
    }
}
