//! Live health of the shards in one storage set.
//!
//! `NodeSetState` is shared by every selector covering the same storage set and
//! is updated out-of-band by the storage layer. Each shard's state lives in its
//! own lock-free cell, so a reader never sees a torn value while writers
//! update other shards concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::node::{ShardId, StorageSet};

/// Why a shard should not (or should preferably not) receive new records.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[repr(u8)]
pub enum NotAvailableReason {
    /// Healthy.
    #[default]
    None,
    /// Writable, but currently rejecting some load.
    Overloaded,
    /// Writable, but close to running out of space.
    LowWatermarkNoSpace,
    /// Writable, but responding slowly.
    Slow,
    /// Out of space.
    NoSpace,
    /// No route to the node.
    Unroutable,
    /// Store refuses writes (e.g. disk error).
    StoreDisabled,
    /// Recovering; only probe traffic allowed.
    Probing,
}

impl NotAvailableReason {
    /// Shard may be picked for a new copyset.
    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            NotAvailableReason::None
                | NotAvailableReason::Overloaded
                | NotAvailableReason::LowWatermarkNoSpace
                | NotAvailableReason::Slow
        )
    }

    /// Shard is writable and has no soft-avoid flag.
    #[inline]
    pub fn is_ideal(&self) -> bool {
        matches!(self, NotAvailableReason::None)
    }
}

/// Per-shard health of a fixed storage set.
#[derive(Debug)]
pub struct NodeSetState {
    shards: StorageSet,
    index: HashMap<ShardId, usize>,
    states: Vec<AtomicCell<NotAvailableReason>>,
}

impl NodeSetState {
    /// All shards start healthy. Duplicates in `shards` collapse to one entry.
    pub fn new(shards: &[ShardId]) -> Self {
        let mut unique = StorageSet::with_capacity(shards.len());
        let mut index = HashMap::with_capacity(shards.len());
        for shard in shards {
            if !index.contains_key(shard) {
                index.insert(*shard, unique.len());
                unique.push(*shard);
            }
        }
        let states = unique
            .iter()
            .map(|_| AtomicCell::new(NotAvailableReason::None))
            .collect();
        Self {
            shards: unique,
            index,
            states,
        }
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn contains(&self, shard: ShardId) -> bool {
        self.index.contains_key(&shard)
    }

    /// Current reason for `shard`, or `None` if it is not part of the set.
    pub fn get(&self, shard: ShardId) -> Option<NotAvailableReason> {
        self.index.get(&shard).map(|idx| self.states[*idx].load())
    }

    /// Update `shard`'s state. Returns false if the shard is not in the set.
    pub fn set(&self, shard: ShardId, reason: NotAvailableReason) -> bool {
        match self.index.get(&shard) {
            Some(idx) => {
                let previous = self.states[*idx].swap(reason);
                if previous != reason {
                    debug!(%shard, ?previous, ?reason, "shard state changed");
                }
                true
            }
            None => false,
        }
    }

    /// Mark `shard` healthy again.
    pub fn clear(&self, shard: ShardId) -> bool {
        self.set(shard, NotAvailableReason::None)
    }

    /// False for shards outside the set.
    #[inline]
    pub fn is_writable(&self, shard: ShardId) -> bool {
        self.get(shard).map(|r| r.is_writable()).unwrap_or(false)
    }

    #[inline]
    pub fn is_ideal(&self, shard: ShardId) -> bool {
        self.get(shard).map(|r| r.is_ideal()).unwrap_or(false)
    }

    pub fn num_writable(&self) -> usize {
        self.states.iter().filter(|s| s.load().is_writable()).count()
    }

    pub fn writable_shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.shards
            .iter()
            .zip(&self.states)
            .filter(|(_, state)| state.load().is_writable())
            .map(|(shard, _)| *shard)
    }
}

/// Hands out one shared `NodeSetState` per distinct storage set.
///
/// Logs whose epochs use the same storage set observe the same health. Entries
/// are held weakly and disappear once the last selector drops its state.
#[derive(Debug, Default)]
pub struct NodeSetStateRegistry {
    states: Mutex<HashMap<StorageSet, Weak<NodeSetState>>>,
}

impl NodeSetStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, shards: &[ShardId]) -> Arc<NodeSetState> {
        let mut states = self.states.lock();
        if let Some(existing) = states.get(shards).and_then(Weak::upgrade) {
            return existing;
        }
        states.retain(|_, weak| weak.strong_count() > 0);
        let state = Arc::new(NodeSetState::new(shards));
        states.insert(shards.to_vec(), Arc::downgrade(&state));
        state
    }

    /// Number of live storage sets tracked.
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shards(n: u16) -> StorageSet {
        (1..=n).map(|i| ShardId::new(i, 0)).collect()
    }

    #[test]
    fn test_initially_all_writable() {
        let state = NodeSetState::new(&shards(4));
        assert_eq!(state.num_writable(), 4);
        assert!(state.is_ideal(ShardId::new(1, 0)));
        assert!(!state.is_writable(ShardId::new(9, 0)));
    }

    #[test]
    fn test_soft_and_hard_reasons() {
        let state = NodeSetState::new(&shards(3));
        assert!(state.set(ShardId::new(1, 0), NotAvailableReason::Slow));
        assert!(state.set(ShardId::new(2, 0), NotAvailableReason::NoSpace));

        assert!(state.is_writable(ShardId::new(1, 0)));
        assert!(!state.is_ideal(ShardId::new(1, 0)));
        assert!(!state.is_writable(ShardId::new(2, 0)));
        assert_eq!(state.num_writable(), 2);
        assert_eq!(
            state.writable_shards().collect::<Vec<_>>(),
            vec![ShardId::new(1, 0), ShardId::new(3, 0)]
        );

        assert!(state.clear(ShardId::new(2, 0)));
        assert_eq!(state.num_writable(), 3);
        assert!(!state.set(ShardId::new(7, 0), NotAvailableReason::NoSpace));
    }

    #[test]
    fn test_duplicates_collapse() {
        let state = NodeSetState::new(&[ShardId::new(1, 0), ShardId::new(1, 0)]);
        assert_eq!(state.shards().len(), 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let state = Arc::new(NodeSetState::new(&shards(8)));
        let handles: Vec<_> = (1..=8u16)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        state.set(ShardId::new(i, 0), NotAvailableReason::Unroutable);
                        state.clear(ShardId::new(i, 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.num_writable(), 8);
    }

    #[test]
    fn test_registry_shares_state() {
        let registry = NodeSetStateRegistry::new();
        let a = registry.get_or_create(&shards(3));
        let b = registry.get_or_create(&shards(3));
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.get_or_create(&shards(4));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);

        drop(a);
        drop(b);
        assert_eq!(registry.len(), 1);
    }
}
