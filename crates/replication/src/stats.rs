//! Selection outcome counters.
//!
//! Counters are shared by every selector and manager running on a worker and
//! mirrored to the `metrics` facade. Nothing waits on them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::SelectionError;

/// Events counted by the placement layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stat {
    CopysetSelected,
    InsufficientWritableShards,
    InsufficientDomains,
    BiasWarningPrinted,
    BiasWarningSuppressed,
    StickyBlockStarted,
    StickyCopysetReused,
    StickyInvalidatedUnwritable,
    StickyInvalidatedConsistency,
}

impl Stat {
    pub fn metric_name(&self) -> &'static str {
        match self {
            Stat::CopysetSelected => "copyset.selected",
            Stat::InsufficientWritableShards => "copyset.failed.insufficient_writable_shards",
            Stat::InsufficientDomains => "copyset.failed.insufficient_domains",
            Stat::BiasWarningPrinted => "copyset.bias_warnings.printed",
            Stat::BiasWarningSuppressed => "copyset.bias_warnings.suppressed",
            Stat::StickyBlockStarted => "copyset.sticky.blocks_started",
            Stat::StickyCopysetReused => "copyset.sticky.reused",
            Stat::StickyInvalidatedUnwritable => "copyset.sticky.invalidated.unwritable",
            Stat::StickyInvalidatedConsistency => "copyset.sticky.invalidated.consistency",
        }
    }
}

#[derive(Debug, Default)]
pub struct SelectionStats {
    copysets_selected: AtomicU64,
    insufficient_writable_shards: AtomicU64,
    insufficient_domains: AtomicU64,
    bias_warnings_printed: AtomicU64,
    bias_warnings_suppressed: AtomicU64,
    sticky_blocks_started: AtomicU64,
    sticky_copysets_reused: AtomicU64,
    sticky_invalidated_unwritable: AtomicU64,
    sticky_invalidated_consistency: AtomicU64,
}

/// Point-in-time copy of `SelectionStats`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub copysets_selected: u64,
    pub insufficient_writable_shards: u64,
    pub insufficient_domains: u64,
    pub bias_warnings_printed: u64,
    pub bias_warnings_suppressed: u64,
    pub sticky_blocks_started: u64,
    pub sticky_copysets_reused: u64,
    pub sticky_invalidated_unwritable: u64,
    pub sticky_invalidated_consistency: u64,
}

impl StatsSnapshot {
    /// Calls that reached a selector, successful or not.
    pub fn selector_invocations(&self) -> u64 {
        self.copysets_selected + self.insufficient_writable_shards + self.insufficient_domains
    }
}

impl SelectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, stat: Stat) -> &AtomicU64 {
        match stat {
            Stat::CopysetSelected => &self.copysets_selected,
            Stat::InsufficientWritableShards => &self.insufficient_writable_shards,
            Stat::InsufficientDomains => &self.insufficient_domains,
            Stat::BiasWarningPrinted => &self.bias_warnings_printed,
            Stat::BiasWarningSuppressed => &self.bias_warnings_suppressed,
            Stat::StickyBlockStarted => &self.sticky_blocks_started,
            Stat::StickyCopysetReused => &self.sticky_copysets_reused,
            Stat::StickyInvalidatedUnwritable => &self.sticky_invalidated_unwritable,
            Stat::StickyInvalidatedConsistency => &self.sticky_invalidated_consistency,
        }
    }

    pub fn bump(&self, stat: Stat) {
        self.counter(stat).fetch_add(1, Ordering::Relaxed);
        metrics::counter!(stat.metric_name()).increment(1);
    }

    /// Count the outcome of one selector invocation.
    pub fn record_outcome<T>(&self, outcome: &Result<T, SelectionError>) {
        let stat = match outcome {
            Ok(_) => Stat::CopysetSelected,
            Err(SelectionError::InsufficientWritableShards { .. }) => Stat::InsufficientWritableShards,
            Err(SelectionError::InsufficientDomains { .. }) => Stat::InsufficientDomains,
        };
        self.bump(stat);
    }

    pub fn get(&self, stat: Stat) -> u64 {
        self.counter(stat).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            copysets_selected: self.get(Stat::CopysetSelected),
            insufficient_writable_shards: self.get(Stat::InsufficientWritableShards),
            insufficient_domains: self.get(Stat::InsufficientDomains),
            bias_warnings_printed: self.get(Stat::BiasWarningPrinted),
            bias_warnings_suppressed: self.get(Stat::BiasWarningSuppressed),
            sticky_blocks_started: self.get(Stat::StickyBlockStarted),
            sticky_copysets_reused: self.get(Stat::StickyCopysetReused),
            sticky_invalidated_unwritable: self.get(Stat::StickyInvalidatedUnwritable),
            sticky_invalidated_consistency: self.get(Stat::StickyInvalidatedConsistency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome() {
        let stats = SelectionStats::new();
        stats.record_outcome::<()>(&Ok(()));
        stats.record_outcome::<()>(&Err(SelectionError::InsufficientWritableShards {
            required: 3,
            available: 1,
        }));
        let snap = stats.snapshot();
        assert_eq!(snap.copysets_selected, 1);
        assert_eq!(snap.insufficient_writable_shards, 1);
        assert_eq!(snap.selector_invocations(), 2);
    }
}
