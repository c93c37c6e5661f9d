//! The copyset: shards holding the replicas of one record.

use std::fmt;
use std::ops::Deref;

use corelib::ShardId;
use serde::Serialize;

/// Ordered, duplicate-free list of shards produced by a selector.
///
/// Immutable once returned; the sticky manager hands out clones of the same
/// value for every record of a block.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CopySet(Vec<ShardId>);

impl CopySet {
    pub(crate) fn new(shards: Vec<ShardId>) -> Self {
        debug_assert!(
            {
                let mut sorted = shards.clone();
                sorted.sort();
                sorted.windows(2).all(|w| w[0] != w[1])
            },
            "copyset contains a duplicate shard"
        );
        Self(shards)
    }

    pub fn shards(&self) -> &[ShardId] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<ShardId> {
        self.0
    }
}

impl Deref for CopySet {
    type Target = [ShardId];

    fn deref(&self) -> &[ShardId] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a CopySet {
    type Item = &'a ShardId;
    type IntoIter = std::slice::Iter<'a, ShardId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for CopySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, shard) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", shard)?;
        }
        f.write_str("]")
    }
}
