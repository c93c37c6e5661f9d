//! End-to-end tests for copyset selection through the factory and managers.
//!
//! # Test Strategy
//!
//! 1. **Scenarios**: the reference placements (linear, one-per-rack, too few
//!    racks, sticky block rollover)
//! 2. **Managers**: health-driven invalidation, config match checks
//! 3. **Failures**: every selector refuses rather than returning partial sets
//! 4. **Properties**: random topologies and health, checked with proptest

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corelib::{
    EpochMetaData, LogId, NodeId, NodeLocationScope, NodeSetState, NodesConfiguration, NotAvailableReason,
    ReplicationProperty, ShardId, StorageState,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use replication::{
    CopySet, CopySetManager, CopySetSelector, CopySetSelectorFactory, LogAttributes, SelectionError,
    SelectionStats, Selector, SelectorContext, Settings,
};

use NodeLocationScope::*;

// ============================================================================
// Helpers
// ============================================================================

/// `per_rack` single-shard nodes in each of `racks` racks, racks split
/// across two rows. Node ids start at 1.
fn topology(racks: u16, per_rack: u16) -> (NodesConfiguration, Vec<ShardId>) {
    let mut builder = NodesConfiguration::builder().with_version(1);
    let mut shards = Vec::new();
    for rack in 0..racks {
        for i in 0..per_rack {
            let id = rack * per_rack + i + 1;
            builder = builder.add_storage_node(id, &format!("eu.c1.row{}.rack{}", rack % 2, rack), 1);
            shards.push(ShardId::new(id, 0));
        }
    }
    (builder.build().unwrap(), shards)
}

struct Fixture {
    config: NodesConfiguration,
    epoch: EpochMetaData,
    state: Arc<NodeSetState>,
    stats: Arc<SelectionStats>,
    settings: Settings,
    attrs: Option<LogAttributes>,
}

impl Fixture {
    fn new(config: NodesConfiguration, shards: Vec<ShardId>, replication: ReplicationProperty) -> Self {
        let state = Arc::new(NodeSetState::new(&shards));
        Self {
            config,
            epoch: EpochMetaData::new(shards, replication),
            state,
            stats: Arc::new(SelectionStats::new()),
            settings: Settings::default(),
            attrs: None,
        }
    }

    fn ctx(&self) -> SelectorContext<'_> {
        SelectorContext {
            log_id: LogId(100),
            epoch: &self.epoch,
            nodeset_state: Arc::clone(&self.state),
            config: &self.config,
            my_node_id: Some(NodeId(1)),
            log_attrs: self.attrs.as_ref(),
            settings: &self.settings,
            stats: Arc::clone(&self.stats),
        }
    }

    fn selector(&self) -> Selector {
        CopySetSelectorFactory::create(&self.ctx()).unwrap()
    }

    fn manager(&self) -> CopySetManager {
        CopySetSelectorFactory::create_manager(&self.ctx()).unwrap()
    }
}

fn distinct_domains(config: &NodesConfiguration, copyset: &CopySet, scope: NodeLocationScope) -> usize {
    copyset
        .iter()
        .filter_map(|s| config.domain_of(*s, scope))
        .collect::<HashSet<_>>()
        .len()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_linear_three_of_five() {
    // Five writable shards, {node: 3}.
    let (config, shards) = topology(1, 5);
    let fixture = Fixture::new(config, shards.clone(), ReplicationProperty::simple(Node, 3));
    let selector = fixture.selector();
    assert!(matches!(selector, Selector::Linear(_)));

    let copyset = selector.select(&mut StdRng::seed_from_u64(2024)).unwrap();
    assert_eq!(copyset.len(), 3);
    assert_eq!(copyset.iter().collect::<HashSet<_>>().len(), 3);
    assert!(copyset.iter().all(|s| shards.contains(s)));

    // Same seed, same copyset.
    let again = selector.select(&mut StdRng::seed_from_u64(2024)).unwrap();
    assert_eq!(copyset, again);
}

#[test]
fn test_cross_domain_one_per_rack() {
    // Six shards across three racks, {rack: 3}.
    let (config, shards) = topology(3, 2);
    let fixture = Fixture::new(config, shards, ReplicationProperty::simple(Rack, 3));
    let selector = fixture.selector();
    assert!(matches!(selector, Selector::CrossDomain(_)));

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..100 {
        let copyset = selector.select(&mut rng).unwrap();
        assert_eq!(copyset.len(), 3);
        assert_eq!(distinct_domains(&fixture.config, &copyset, Rack), 3);
    }
}

#[test]
fn test_cross_domain_too_few_racks() {
    // Four shards, {rack: 3}, only two racks.
    let (config, shards) = topology(2, 2);
    let fixture = Fixture::new(config, shards, ReplicationProperty::simple(Rack, 3));
    let result = fixture.selector().select(&mut StdRng::seed_from_u64(1));
    assert_eq!(
        result,
        Err(SelectionError::InsufficientDomains {
            scope: Rack,
            required: 3,
            available: 2
        })
    );
}

#[test]
fn test_sticky_block_of_three() {
    let (config, shards) = topology(3, 2);
    let mut fixture = Fixture::new(config, shards, ReplicationProperty::simple(Rack, 3));
    fixture.settings.sticky_copysets = true;
    fixture.settings.sticky_copysets_block_size = 3;
    let mut manager = fixture.manager();
    assert!(manager.is_sticky());

    let mut rng = StdRng::seed_from_u64(5);
    let now = Instant::now();
    let first = manager.get_copyset(now, &mut rng).unwrap();
    assert_eq!(manager.get_copyset(now, &mut rng).unwrap(), first);
    assert_eq!(manager.get_copyset(now, &mut rng).unwrap(), first);
    assert_eq!(fixture.stats.snapshot().selector_invocations(), 1);

    // Fourth record opens a new block through a fresh selection.
    manager.get_copyset(now, &mut rng).unwrap();
    let snapshot = fixture.stats.snapshot();
    assert_eq!(snapshot.selector_invocations(), 2);
    assert_eq!(snapshot.sticky_blocks_started, 2);
    assert_eq!(snapshot.sticky_copysets_reused, 2);
}

// ============================================================================
// Managers
// ============================================================================

#[test]
fn test_pass_through_selects_every_time() {
    let (config, shards) = topology(1, 5);
    let fixture = Fixture::new(config, shards, ReplicationProperty::simple(Node, 2));
    let mut manager = fixture.manager();
    assert!(!manager.is_sticky());

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..10 {
        manager.get_copyset(Instant::now(), &mut rng).unwrap();
    }
    assert_eq!(fixture.stats.snapshot().copysets_selected, 10);
}

#[test]
fn test_sticky_override_per_log() {
    let (config, shards) = topology(1, 5);
    let mut fixture = Fixture::new(config, shards, ReplicationProperty::simple(Node, 2));
    fixture.attrs = Some(LogAttributes {
        sticky_copysets: Some(true),
        sticky_copysets_block_max_time: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let mut manager = fixture.manager();
    assert!(manager.is_sticky());

    let mut rng = StdRng::seed_from_u64(5);
    let start = Instant::now();
    let first = manager.get_copyset(start, &mut rng).unwrap();
    assert_eq!(manager.get_copyset(start + Duration::from_millis(49), &mut rng).unwrap(), first);
    manager.get_copyset(start + Duration::from_millis(50), &mut rng).unwrap();
    assert_eq!(fixture.stats.snapshot().selector_invocations(), 2);
}

#[test]
fn test_sticky_forced_invalidation() {
    let (config, shards) = topology(3, 3);
    let replication = ReplicationProperty::new().with(Rack, 2).with(Node, 3);
    let mut fixture = Fixture::new(config, shards, replication);
    fixture.settings.sticky_copysets = true;
    let mut manager = fixture.manager();

    let mut rng = StdRng::seed_from_u64(5);
    let now = Instant::now();
    let first = manager.get_copyset(now, &mut rng).unwrap();
    let victim = first[1];
    assert!(fixture.state.set(victim, NotAvailableReason::StoreDisabled));

    let second = manager.get_copyset(now, &mut rng).unwrap();
    assert!(!second.contains(&victim));
    assert_eq!(fixture.stats.snapshot().sticky_invalidated_unwritable, 1);
}

#[test]
fn test_config_match_check() {
    let (config, shards) = topology(3, 2);
    let fixture = Fixture::new(config.clone(), shards, ReplicationProperty::simple(Rack, 2));
    let manager = fixture.manager();
    assert!(manager.matches_config(&config));

    // Same membership under a new version still matches.
    let bumped = config
        .nodes()
        .fold(NodesConfiguration::builder().with_version(2), |b, node| b.add_node(node.clone()));
    assert!(manager.matches_config(&bumped.build().unwrap()));

    // A node turning read-only changes the writer view.
    let mut builder = NodesConfiguration::builder().with_version(3);
    for node in config.nodes() {
        let node = if node.id == NodeId(3) {
            node.clone().with_storage_state(StorageState::ReadOnly)
        } else {
            node.clone()
        };
        builder = builder.add_node(node);
    }
    assert!(!manager.matches_config(&builder.build().unwrap()));
}

#[test]
fn test_read_only_node_excluded_at_construction() {
    let config = NodesConfiguration::builder()
        .add_storage_node(1, "eu.c1.row1.rack1", 1)
        .add_storage_node(2, "eu.c1.row1.rack2", 1)
        .add_node(
            corelib::Node::with_location(NodeId(3), "node3", "eu.c1.row1.rack3", 1)
                .unwrap()
                .with_storage_state(StorageState::ReadOnly),
        )
        .build()
        .unwrap();
    let shards: Vec<_> = (1..=3).map(|i| ShardId::new(i, 0)).collect();
    let fixture = Fixture::new(config, shards, ReplicationProperty::simple(Node, 2));
    let selector = fixture.selector();
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..50 {
        assert!(!selector.select(&mut rng).unwrap().contains(&ShardId::new(3, 0)));
    }
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_every_selector_refuses_partial_copysets() {
    let properties = [
        ReplicationProperty::simple(Node, 3),
        ReplicationProperty::simple(Rack, 3),
        ReplicationProperty::new().with(Rack, 2).with(Node, 3),
    ];
    for replication in properties {
        let (config, shards) = topology(3, 1);
        let fixture = Fixture::new(config, shards.clone(), replication.clone());
        assert!(fixture.state.set(shards[0], NotAvailableReason::Unroutable));

        let selector = fixture.selector();
        let result = selector.select(&mut StdRng::seed_from_u64(9));
        assert_eq!(
            result,
            Err(SelectionError::InsufficientWritableShards {
                required: 3,
                available: 2
            }),
            "{} with {}",
            selector.name(),
            replication
        );
    }
}

#[test]
fn test_failures_are_counted() {
    let (config, shards) = topology(2, 2);
    let fixture = Fixture::new(config, shards, ReplicationProperty::simple(Rack, 3));
    let mut manager = fixture.manager();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(manager.get_copyset(Instant::now(), &mut rng).is_err());
    assert_eq!(fixture.stats.snapshot().insufficient_domains, 1);
}

// ============================================================================
// Properties
// ============================================================================

fn replication_strategy() -> impl Strategy<Value = ReplicationProperty> {
    prop_oneof![
        (1usize..=4).prop_map(|r| ReplicationProperty::simple(Node, r)),
        (2usize..=4).prop_map(|r| ReplicationProperty::simple(Rack, r)),
        Just(ReplicationProperty::simple(Row, 2)),
        ((2usize..=3), (0usize..=2)).prop_map(|(racks, extra)| {
            ReplicationProperty::new().with(Rack, racks).with(Node, racks + extra)
        }),
        ((1usize..=2), (2usize..=3), (0usize..=2)).prop_map(|(rows, racks, extra)| {
            ReplicationProperty::new()
                .with(Row, rows)
                .with(Rack, racks.max(rows))
                .with(Node, racks.max(rows) + extra)
        }),
    ]
}

proptest! {
    #[test]
    fn prop_selection_is_valid_or_fails_cleanly(
        racks in 1u16..=6,
        per_rack in 1u16..=4,
        replication in replication_strategy(),
        down_mask in any::<u32>(),
        weighted in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let (config, shards) = topology(racks, per_rack);
        let mut fixture = Fixture::new(config, shards.clone(), replication.clone());
        fixture.settings.weighted_copyset_selector = weighted;
        for (idx, shard) in shards.iter().enumerate() {
            if down_mask & (1 << (idx % 32)) != 0 {
                fixture.state.set(*shard, NotAvailableReason::NoSpace);
            }
        }

        let selector = fixture.selector();
        let r = replication.replication_factor();
        let writable = fixture.state.num_writable();
        let mut rng = StdRng::seed_from_u64(seed);

        for _ in 0..5 {
            match selector.select(&mut rng) {
                Ok(copyset) => {
                    prop_assert_eq!(copyset.len(), r);
                    prop_assert_eq!(copyset.iter().collect::<HashSet<_>>().len(), r);
                    for shard in copyset.iter() {
                        prop_assert!(fixture.state.is_writable(*shard));
                    }
                    for (scope, factor) in replication.iter() {
                        prop_assert!(
                            distinct_domains(&fixture.config, &copyset, scope) >= factor,
                            "{} violates {} at {}", copyset, replication, scope
                        );
                    }
                }
                Err(SelectionError::InsufficientWritableShards { required, available }) => {
                    prop_assert_eq!(required, r);
                    prop_assert!(available < r);
                    prop_assert!(writable < r);
                }
                Err(SelectionError::InsufficientDomains { required, available, .. }) => {
                    prop_assert!(writable >= r);
                    prop_assert!(available < required);
                }
            }
        }
    }

    #[test]
    fn prop_sticky_reuses_until_block_full(
        block_size in 1usize..=8,
        records in 1usize..=40,
        seed in any::<u64>(),
    ) {
        let (config, shards) = topology(3, 2);
        let mut fixture = Fixture::new(config, shards, ReplicationProperty::simple(Rack, 3));
        fixture.settings.sticky_copysets = true;
        fixture.settings.sticky_copysets_block_size = block_size;
        let mut manager = fixture.manager();
        let mut rng = StdRng::seed_from_u64(seed);
        let now = Instant::now();

        let mut previous: Option<CopySet> = None;
        for record in 0..records {
            let copyset = manager.get_copyset(now, &mut rng).unwrap();
            if record % block_size != 0 {
                prop_assert_eq!(Some(&copyset), previous.as_ref());
            }
            previous = Some(copyset);
        }
        let expected_blocks = (records + block_size - 1) / block_size;
        prop_assert_eq!(fixture.stats.snapshot().selector_invocations(), expected_blocks as u64);
    }
}
