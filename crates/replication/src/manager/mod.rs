//! Copyset managers: the per-record policy layer over a selector.
//!
//! - **PassThroughCopySetManager**: every record gets a fresh selection
//! - **StickyCopySetManager**: one copyset is reused for a bounded block of
//!   records, cutting placement churn

pub mod pass_through;
pub mod sticky;

pub use pass_through::PassThroughCopySetManager;
pub use sticky::{StickyBlock, StickyCopySetManager};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use corelib::{NodeSetState, NodesConfiguration, NotAvailableReason, ShardId, StorageSet};
use rand::Rng;
use tracing::debug;

use crate::copyset::CopySet;
use crate::error::SelectionError;
use crate::selector::{CopySetSelector, Selector};
use crate::stats::SelectionStats;

/// State shared by both manager variants.
#[derive(Debug)]
pub(crate) struct ManagerBase {
    selector: Selector,
    nodeset_state: Arc<NodeSetState>,
    stats: Arc<SelectionStats>,
    config_check: Option<ConfigMatchCheck>,
}

/// Writer view of the epoch's storage set under the latest configuration the
/// manager has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigMatchCheck {
    storage_set: StorageSet,
    writer_view: StorageSet,
    members: HashSet<ShardId>,
}

impl ConfigMatchCheck {
    fn new(storage_set: &[ShardId], config: &NodesConfiguration) -> Self {
        let writer_view = config.writer_view(storage_set);
        Self {
            storage_set: storage_set.to_vec(),
            members: writer_view.iter().copied().collect(),
            writer_view,
        }
    }
}

impl ManagerBase {
    pub(crate) fn new(selector: Selector, stats: Arc<SelectionStats>) -> Self {
        let nodeset_state = Arc::clone(selector.nodeset_state());
        Self {
            selector,
            nodeset_state,
            stats,
            config_check: None,
        }
    }

    /// False if `shard` left the writer view. Always true before a
    /// configuration was registered.
    pub(crate) fn in_writer_view(&self, shard: ShardId) -> bool {
        self.config_check
            .as_ref()
            .map(|check| check.members.contains(&shard))
            .unwrap_or(true)
    }

    /// Run the selector once and count the outcome.
    pub(crate) fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        let outcome = self.selector.select(rng);
        self.stats.record_outcome(&outcome);
        if let Err(err) = &outcome {
            debug!(selector = self.selector.name(), %err, "copyset selection failed");
        }
        outcome
    }
}

/// Per-epoch copyset source invoked once per appended record.
///
/// Each instance is driven by a single worker; no two calls overlap.
#[derive(Debug)]
pub enum CopySetManager {
    PassThrough(PassThroughCopySetManager),
    Sticky(StickyCopySetManager),
}

impl CopySetManager {
    /// Copyset for the next record appended at `now`.
    ///
    /// Selection failures propagate unchanged; the manager does not retry.
    pub fn get_copyset<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Result<CopySet, SelectionError> {
        match self {
            CopySetManager::PassThrough(m) => m.get_copyset(rng),
            CopySetManager::Sticky(m) => m.get_copyset(now, rng),
        }
    }

    fn base(&self) -> &ManagerBase {
        match self {
            CopySetManager::PassThrough(m) => &m.base,
            CopySetManager::Sticky(m) => &m.base,
        }
    }

    fn base_mut(&mut self) -> &mut ManagerBase {
        match self {
            CopySetManager::PassThrough(m) => &mut m.base,
            CopySetManager::Sticky(m) => &mut m.base,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.base().selector
    }

    pub fn nodeset_state(&self) -> &Arc<NodeSetState> {
        &self.base().nodeset_state
    }

    pub fn stats(&self) -> &Arc<SelectionStats> {
        &self.base().stats
    }

    pub fn is_sticky(&self) -> bool {
        matches!(self, CopySetManager::Sticky(_))
    }

    /// Remember which shards of `storage_set` are writable in `config`, so a
    /// later snapshot can be compared with `matches_config`.
    pub fn prepare_config_match_check(&mut self, storage_set: &[ShardId], config: &NodesConfiguration) {
        self.base_mut().config_check = Some(ConfigMatchCheck::new(storage_set, config));
    }

    /// True if `config` yields the same writable membership as the snapshot
    /// last registered or refreshed. Callers rebuild the manager otherwise.
    ///
    /// Always false before `prepare_config_match_check`.
    pub fn matches_config(&self, config: &NodesConfiguration) -> bool {
        match &self.base().config_check {
            Some(check) => config.writer_view(&check.storage_set) == check.writer_view,
            None => false,
        }
    }

    /// Adopt `config` as the current membership and report whether the writer
    /// view is unchanged. Shards that left the view are marked
    /// `StoreDisabled` so fresh selections avoid them, and a sticky block
    /// holding one is dropped on the next `get_copyset`. Shards that rejoin
    /// become writable again once the storage layer clears them.
    ///
    /// Returns false, and records nothing, before `prepare_config_match_check`.
    pub fn refresh_config(&mut self, config: &NodesConfiguration) -> bool {
        let base = self.base_mut();
        let check = match base.config_check.as_mut() {
            Some(check) => check,
            None => return false,
        };
        let refreshed = ConfigMatchCheck::new(&check.storage_set, config);
        if refreshed.writer_view == check.writer_view {
            return true;
        }

        for shard in check.writer_view.iter().filter(|s| !refreshed.members.contains(*s)) {
            base.nodeset_state.set(*shard, NotAvailableReason::StoreDisabled);
        }
        debug!(
            version = config.version(),
            writable = refreshed.writer_view.len(),
            previously = check.writer_view.len(),
            "writer view changed"
        );
        *check = refreshed;
        false
    }
}
