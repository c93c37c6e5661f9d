//! Node, shard and log identifiers.
//!
//! Storage nodes are identified by a compact `NodeId`; each node exposes a
//! fixed number of shards, and a `ShardId` names one of them. Both are cheap
//! to copy, compare and hash since they sit on the per-record write path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::NodeLocation;

/// Compact identifier for a node in the cluster.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// Identifies one storage shard: (node, shard index within the node).
///
/// Ordering is by node first, then shard index.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ShardId {
    pub node: NodeId,
    pub shard: u16,
}

impl ShardId {
    #[inline]
    pub const fn new(node: u16, shard: u16) -> Self {
        Self {
            node: NodeId(node),
            shard,
        }
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:S{}", self.node, self.shard)
    }
}

impl FromStr for ShardId {
    type Err = Error;

    /// Parses the `Display` form, `N3:S1`. The `N`/`S` prefixes are optional.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid shard id '{}'", s));
        let (node, shard) = s.split_once(':').ok_or_else(invalid)?;
        let node = node.strip_prefix('N').unwrap_or(node);
        let shard = shard.strip_prefix('S').unwrap_or(shard);
        Ok(ShardId::new(
            node.parse().map_err(|_| invalid())?,
            shard.parse().map_err(|_| invalid())?,
        ))
    }
}

/// Ordered candidate set of shards for an epoch (the "nodeset").
///
/// Insertion order is stable and only used as an index space.
pub type StorageSet = Vec<ShardId>;

/// Identifier of a log.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub u64);

impl LogId {
    /// Largest id a user (data) log may have.
    pub const USER_MAX: u64 = (1 << 62) - 1;
    /// Metadata logs carry this bit on top of their data log id.
    pub const METADATA_BIT: u64 = 1 << 62;
    /// Internal logs occupy the top of the user range.
    pub const INTERNAL_RANGE: u64 = 256;

    /// Metadata log that stores epoch metadata for `self`.
    pub fn metadata_log(self) -> LogId {
        LogId(self.0 | Self::METADATA_BIT)
    }

    pub fn is_metadata_log(&self) -> bool {
        self.0 & Self::METADATA_BIT != 0
    }

    pub fn is_internal(&self) -> bool {
        !self.is_metadata_log() && self.0 <= Self::USER_MAX && self.0 > Self::USER_MAX - Self::INTERNAL_RANGE
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_metadata_log() {
            write!(f, "M{}", self.0 & !Self::METADATA_BIT)
        } else {
            write!(f, "L{}", self.0)
        }
    }
}

/// Storage membership state of a node, as seen by writers.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    /// Accepts new records.
    #[default]
    ReadWrite,
    /// Serves reads only; excluded from new copysets.
    ReadOnly,
    /// Not a storage member.
    None,
}

impl StorageState {
    #[inline]
    pub fn can_write_to(&self) -> bool {
        matches!(self, StorageState::ReadWrite)
    }
}

/// Storage node participating in the cluster.
///
/// Keep this struct small and cheap to clone; live health lives in
/// `NodeSetState`, not here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name or hostname.
    #[serde(default)]
    pub name: String,
    /// Failure-domain location, if configured.
    #[serde(default)]
    pub location: Option<NodeLocation>,
    /// Number of shards the node exposes.
    #[serde(default = "default_num_shards")]
    pub num_shards: u16,
    #[serde(default)]
    pub storage_state: StorageState,
}

fn default_num_shards() -> u16 {
    1
}

impl Node {
    /// Construct a writable storage node with a single shard and no location.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            location: None,
            num_shards: 1,
            storage_state: StorageState::ReadWrite,
        }
    }

    /// Construct a writable storage node at `location` with `num_shards` shards.
    pub fn with_location(
        id: NodeId,
        name: impl Into<String>,
        location: &str,
        num_shards: u16,
    ) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            location: Some(location.parse()?),
            num_shards,
            storage_state: StorageState::ReadWrite,
        })
    }

    pub fn with_storage_state(mut self, state: StorageState) -> Self {
        self.storage_state = state;
        self
    }

    pub fn with_num_shards(mut self, num_shards: u16) -> Self {
        self.num_shards = num_shards;
        self
    }

    /// All shards exposed by this node.
    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        (0..self.num_shards).map(move |shard| ShardId { node: self.id, shard })
    }
}
