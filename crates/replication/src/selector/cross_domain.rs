//! Cross-domain copyset selector.
//!
//! Places one copy in each of `r` distinct failure domains at a single scope
//! (rack, row, cluster or region). Used for simple properties `{scope: r}`
//! with `r > 1` and a scope wider than NODE.
//!
//! # Algorithm
//!
//! 1. Domains are grouped once, at construction, from the topology snapshot
//! 2. Per call, keep domains with at least one writable shard
//! 3. Pick `r` of them uniformly (domains holding an ideal shard first)
//! 4. In each picked domain pick one writable shard uniformly, ideal first
//!
//! Domain order is re-drawn on every call so no domain name is favored.

use std::collections::BTreeMap;
use std::sync::Arc;

use corelib::{LogId, NodeLocationScope, NodeSetState, NodesConfiguration, ShardId};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::copyset::CopySet;
use crate::error::{ConfigurationError, SelectionError};
use crate::selector::{CopySetSelector, HealthSplit};

/// Shards sharing one domain at the selector's scope.
#[derive(Debug, Clone)]
struct Domain {
    name: String,
    shards: Vec<ShardId>,
}

#[derive(Debug)]
pub struct CrossDomainSelector {
    log_id: LogId,
    replication_factor: usize,
    scope: NodeLocationScope,
    domains: Vec<Domain>,
    nodeset_state: Arc<NodeSetState>,
}

impl CrossDomainSelector {
    /// Group `shards` (the writable members of the storage set) by domain.
    ///
    /// Shards whose node has no location at `scope` can never satisfy the
    /// property and are left out.
    pub fn new(
        log_id: LogId,
        shards: &[ShardId],
        nodeset_state: Arc<NodeSetState>,
        config: &NodesConfiguration,
        replication_factor: usize,
        scope: NodeLocationScope,
    ) -> Result<Self, ConfigurationError> {
        if scope == NodeLocationScope::Node {
            return Err(ConfigurationError::UnsupportedScope(scope));
        }

        let mut grouped: BTreeMap<String, Vec<ShardId>> = BTreeMap::new();
        for shard in shards {
            match config.domain_of(*shard, scope) {
                Some(name) => grouped.entry(name).or_default().push(*shard),
                None => warn!(
                    %log_id,
                    %shard,
                    %scope,
                    "shard has no location at replication scope, excluding it from copysets"
                ),
            }
        }

        let domains: Vec<Domain> = grouped
            .into_iter()
            .map(|(name, shards)| Domain { name, shards })
            .collect();
        debug!(
            %log_id,
            %scope,
            replication_factor,
            domains = domains.len(),
            "built cross-domain selector"
        );

        Ok(Self {
            log_id,
            replication_factor,
            scope,
            domains,
            nodeset_state,
        })
    }

    pub fn scope(&self) -> NodeLocationScope {
        self.scope
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Domain names, sorted.
    pub fn domain_names(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|d| d.name.as_str())
    }
}

impl CopySetSelector for CrossDomainSelector {
    fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        let r = self.replication_factor;

        let splits: Vec<HealthSplit> = self
            .domains
            .iter()
            .map(|domain| HealthSplit::new(&domain.shards, &self.nodeset_state))
            .collect();

        let writable: usize = splits.iter().map(HealthSplit::writable).sum();
        if writable < r {
            return Err(SelectionError::InsufficientWritableShards {
                required: r,
                available: writable,
            });
        }

        let mut with_ideal: Vec<usize> = Vec::new();
        let mut soft_only: Vec<usize> = Vec::new();
        for (idx, split) in splits.iter().enumerate() {
            if !split.ideal.is_empty() {
                with_ideal.push(idx);
            } else if !split.soft.is_empty() {
                soft_only.push(idx);
            }
        }

        let live_domains = with_ideal.len() + soft_only.len();
        if live_domains < r {
            debug!(
                log_id = %self.log_id,
                scope = %self.scope,
                live_domains,
                required = r,
                "not enough writable domains"
            );
            return Err(SelectionError::InsufficientDomains {
                scope: self.scope,
                required: r,
                available: live_domains,
            });
        }

        let mut picked: Vec<usize> = Vec::with_capacity(r);
        if with_ideal.len() >= r {
            let (chosen, _) = with_ideal.partial_shuffle(rng, r);
            picked.extend_from_slice(chosen);
        } else {
            picked.extend_from_slice(&with_ideal);
            let missing = r - picked.len();
            let (chosen, _) = soft_only.partial_shuffle(rng, missing);
            picked.extend_from_slice(chosen);
            picked.shuffle(rng);
        }

        let mut copyset = Vec::with_capacity(r);
        for idx in picked {
            // Every picked domain has a writable shard.
            if let Some(shard) = splits[idx].choose(rng) {
                copyset.push(shard);
            }
        }
        Ok(CopySet::new(copyset))
    }

    fn nodeset_state(&self) -> &Arc<NodeSetState> {
        &self.nodeset_state
    }

    fn name(&self) -> &'static str {
        "CrossDomainSelector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::test_support::{assert_valid, mark};
    use corelib::NotAvailableReason;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    /// Six nodes, two per rack, racks rack1..rack3.
    fn six_nodes_three_racks() -> (NodesConfiguration, Vec<ShardId>) {
        let config = NodesConfiguration::builder()
            .add_storage_node(1, "eu.c1.row1.rack1", 1)
            .add_storage_node(2, "eu.c1.row1.rack1", 1)
            .add_storage_node(3, "eu.c1.row1.rack2", 1)
            .add_storage_node(4, "eu.c1.row1.rack2", 1)
            .add_storage_node(5, "eu.c1.row2.rack3", 1)
            .add_storage_node(6, "eu.c1.row2.rack3", 1)
            .build()
            .unwrap();
        let shards = (1..=6).map(|i| ShardId::new(i, 0)).collect();
        (config, shards)
    }

    fn rack_of(config: &NodesConfiguration, shard: ShardId) -> String {
        config.domain_of(shard, NodeLocationScope::Rack).unwrap()
    }

    #[test]
    fn test_one_shard_per_rack() {
        let (config, shards) = six_nodes_three_racks();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector =
            CrossDomainSelector::new(LogId(1), &shards, state, &config, 3, NodeLocationScope::Rack).unwrap();
        assert_eq!(selector.domain_count(), 3);

        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let copyset = selector.select(&mut rng).unwrap();
            assert_valid(&copyset, 3, selector.nodeset_state());
            let racks: HashSet<_> = copyset.iter().map(|s| rack_of(&config, *s)).collect();
            assert_eq!(racks.len(), 3);
        }
    }

    #[test]
    fn test_domain_order_varies() {
        let (config, shards) = six_nodes_three_racks();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector =
            CrossDomainSelector::new(LogId(1), &shards, state, &config, 2, NodeLocationScope::Rack).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let firsts: HashSet<_> = (0..100)
            .map(|_| rack_of(&config, selector.select(&mut rng).unwrap()[0]))
            .collect();
        assert_eq!(firsts.len(), 3);
    }

    #[test]
    fn test_insufficient_domains() {
        // Four shards but only two racks.
        let config = NodesConfiguration::builder()
            .add_storage_node(1, "eu.c1.row1.rack1", 1)
            .add_storage_node(2, "eu.c1.row1.rack1", 1)
            .add_storage_node(3, "eu.c1.row1.rack2", 1)
            .add_storage_node(4, "eu.c1.row1.rack2", 1)
            .build()
            .unwrap();
        let shards: Vec<_> = (1..=4).map(|i| ShardId::new(i, 0)).collect();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector =
            CrossDomainSelector::new(LogId(1), &shards, state, &config, 3, NodeLocationScope::Rack).unwrap();
        assert_eq!(
            selector.select(&mut StdRng::seed_from_u64(0)),
            Err(SelectionError::InsufficientDomains {
                scope: NodeLocationScope::Rack,
                required: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_rack_lost_to_health() {
        let (config, shards) = six_nodes_three_racks();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector = CrossDomainSelector::new(
            LogId(1),
            &shards,
            Arc::clone(&state),
            &config,
            3,
            NodeLocationScope::Rack,
        )
        .unwrap();
        mark(&state, &[ShardId::new(5, 0), ShardId::new(6, 0)], NotAvailableReason::StoreDisabled);
        assert!(matches!(
            selector.select(&mut StdRng::seed_from_u64(0)),
            Err(SelectionError::InsufficientDomains { available: 2, .. })
        ));

        mark(&state, &[ShardId::new(1, 0), ShardId::new(2, 0), ShardId::new(3, 0)], NotAvailableReason::NoSpace);
        assert!(matches!(
            selector.select(&mut StdRng::seed_from_u64(0)),
            Err(SelectionError::InsufficientWritableShards {
                required: 3,
                available: 1
            })
        ));
    }

    #[test]
    fn test_prefers_ideal_within_and_across_domains() {
        let (config, shards) = six_nodes_three_racks();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector = CrossDomainSelector::new(
            LogId(1),
            &shards,
            Arc::clone(&state),
            &config,
            2,
            NodeLocationScope::Rack,
        )
        .unwrap();
        // rack3 only has slow shards, rack1 has one slow shard.
        mark(&state, &[ShardId::new(5, 0), ShardId::new(6, 0), ShardId::new(1, 0)], NotAvailableReason::Slow);
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..50 {
            let copyset = selector.select(&mut rng).unwrap();
            assert!(copyset.contains(&ShardId::new(2, 0)));
            assert!(copyset.iter().any(|s| s.node.0 == 3 || s.node.0 == 4));
        }
    }

    #[test]
    fn test_unlocated_shards_excluded() {
        let config = NodesConfiguration::builder()
            .add_storage_node(1, "eu.c1.row1.rack1", 1)
            .add_storage_node(2, "eu.c1.row1.rack2", 1)
            .add_node(corelib::Node::new(corelib::NodeId(3), "no-location"))
            .build()
            .unwrap();
        let shards: Vec<_> = (1..=3).map(|i| ShardId::new(i, 0)).collect();
        let state = Arc::new(NodeSetState::new(&shards));
        let selector =
            CrossDomainSelector::new(LogId(1), &shards, state, &config, 2, NodeLocationScope::Rack).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..20 {
            assert!(!selector.select(&mut rng).unwrap().contains(&ShardId::new(3, 0)));
        }
    }

    #[test]
    fn test_node_scope_rejected() {
        let (config, shards) = six_nodes_three_racks();
        let state = Arc::new(NodeSetState::new(&shards));
        assert_eq!(
            CrossDomainSelector::new(LogId(1), &shards, state, &config, 2, NodeLocationScope::Node).unwrap_err(),
            ConfigurationError::UnsupportedScope(NodeLocationScope::Node)
        );
    }
}
