//! Sticky manager: reuse one copyset across a bounded block of records.
//!
//! # State machine
//!
//! ```text
//! NoBlock --get--> ActiveBlock            (fresh selection, records = 1)
//! ActiveBlock --get, live--> ActiveBlock  (same copyset, records += 1)
//! ActiveBlock --get, ended--> NoBlock --> ActiveBlock (fresh selection)
//! ```
//!
//! A block ends when it holds `block_size` records, when it is older than
//! `block_max_time`, when one of its shards stops being writable, or when one
//! of its shards left the writer view after a configuration refresh. The
//! shard checks run on every call, even inside an otherwise live block.

use std::sync::Arc;
use std::time::{Duration, Instant};

use corelib::ShardId;
use rand::Rng;
use tracing::{debug, trace};

use crate::copyset::CopySet;
use crate::error::SelectionError;
use crate::manager::ManagerBase;
use crate::selector::Selector;
use crate::settings::StickyConfig;
use crate::stats::{SelectionStats, Stat};

/// Copyset shared by consecutive records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyBlock {
    pub copyset: CopySet,
    pub records_in_block: usize,
    pub block_start: Instant,
}

/// Why an active block was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockEnd {
    /// `block_size` records written.
    Full,
    /// Older than `block_max_time`.
    Expired,
    /// A member shard is no longer writable.
    Unwritable(ShardId),
    /// A member shard left the writer view of the current configuration.
    ConsistencyMismatch(ShardId),
}

#[derive(Debug)]
pub struct StickyCopySetManager {
    pub(crate) base: ManagerBase,
    block_size: usize,
    block_max_time: Duration,
    block: Option<StickyBlock>,
}

impl StickyCopySetManager {
    pub fn new(selector: Selector, stats: Arc<SelectionStats>, block_size: usize, block_max_time: Duration) -> Self {
        Self {
            base: ManagerBase::new(selector, stats),
            block_size,
            block_max_time,
            block: None,
        }
    }

    pub fn from_config(selector: Selector, stats: Arc<SelectionStats>, config: StickyConfig) -> Self {
        Self::new(selector, stats, config.block_size, config.block_max_time)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_max_time(&self) -> Duration {
        self.block_max_time
    }

    /// The active block, if any.
    pub fn current_block(&self) -> Option<&StickyBlock> {
        self.block.as_ref()
    }

    /// Drop the active block; the next call selects afresh.
    pub fn invalidate(&mut self) {
        self.block = None;
    }

    fn check_block(&self, block: &StickyBlock, now: Instant) -> Option<BlockEnd> {
        for shard in block.copyset.iter() {
            if !self.base.in_writer_view(*shard) {
                return Some(BlockEnd::ConsistencyMismatch(*shard));
            }
            if !self.base.nodeset_state.is_writable(*shard) {
                return Some(BlockEnd::Unwritable(*shard));
            }
        }
        if block.records_in_block >= self.block_size {
            return Some(BlockEnd::Full);
        }
        if now.saturating_duration_since(block.block_start) >= self.block_max_time {
            return Some(BlockEnd::Expired);
        }
        None
    }

    pub fn get_copyset<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Result<CopySet, SelectionError> {
        match self.block.as_ref().map(|block| self.check_block(block, now)) {
            Some(None) => {
                if let Some(block) = self.block.as_mut() {
                    block.records_in_block += 1;
                    self.base.stats.bump(Stat::StickyCopysetReused);
                    return Ok(block.copyset.clone());
                }
            }
            Some(Some(end)) => self.end_block(end),
            None => {}
        }

        let copyset = self.base.select(rng)?;
        self.base.stats.bump(Stat::StickyBlockStarted);
        trace!(%copyset, "starting sticky block");
        self.block = Some(StickyBlock {
            copyset: copyset.clone(),
            records_in_block: 1,
            block_start: now,
        });
        Ok(copyset)
    }

    fn end_block(&mut self, end: BlockEnd) {
        match end {
            BlockEnd::Full | BlockEnd::Expired => {
                trace!(?end, "sticky block ended");
            }
            BlockEnd::Unwritable(shard) => {
                debug!(%shard, "sticky block invalidated, shard no longer writable");
                self.base.stats.bump(Stat::StickyInvalidatedUnwritable);
            }
            BlockEnd::ConsistencyMismatch(shard) => {
                debug!(%shard, "sticky block invalidated, shard left the storage set");
                self.base.stats.bump(Stat::StickyInvalidatedConsistency);
            }
        }
        self.block = None;
    }
}
