//! Per-epoch placement metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::{ShardId, StorageSet};
use crate::replication::ReplicationProperty;

/// Optional per-shard load shares. Empty means every shard weighs 1.0.
pub type Weights = BTreeMap<ShardId, f64>;

/// Placement metadata of one epoch of a log.
///
/// Immutable once built; a new epoch gets a new value and the selector built
/// from the old one is dropped with it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetaData {
    #[serde(default)]
    pub epoch: u32,
    pub shards: StorageSet,
    pub replication: ReplicationProperty,
    #[serde(default, with = "weights_serde")]
    pub weights: Weights,
}

impl EpochMetaData {
    pub fn new(shards: StorageSet, replication: ReplicationProperty) -> Self {
        Self {
            epoch: 1,
            shards,
            replication,
            weights: Weights::new(),
        }
    }

    pub fn with_epoch(mut self, epoch: u32) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    /// Load share of `shard`.
    ///
    /// With explicit weights, shards missing from the map weigh nothing.
    pub fn weight_of(&self, shard: &ShardId) -> f64 {
        if self.weights.is_empty() {
            1.0
        } else {
            self.weights.get(shard).copied().unwrap_or(0.0)
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.replication.validate()?;
        let mut seen = std::collections::HashSet::with_capacity(self.shards.len());
        for shard in &self.shards {
            if !seen.insert(*shard) {
                return Err(Error::Topology(format!("shard {} listed twice in storage set", shard)));
            }
        }
        for (shard, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::Config(format!("weight {} of shard {} is not a non-negative number", weight, shard)));
            }
        }
        Ok(())
    }
}

/// JSON object keys must be strings, so weights travel as `{"N1:S0": 2.0}`.
mod weights_serde {
    use super::Weights;
    use crate::node::ShardId;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(weights: &Weights, serializer: S) -> Result<S::Ok, S::Error> {
        let as_strings: BTreeMap<String, f64> =
            weights.iter().map(|(shard, w)| (shard.to_string(), *w)).collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weights, D::Error> {
        let as_strings = BTreeMap::<String, f64>::deserialize(deserializer)?;
        as_strings
            .into_iter()
            .map(|(key, w)| {
                key.parse::<ShardId>()
                    .map(|shard| (shard, w))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
