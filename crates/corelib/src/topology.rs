//! Versioned topology snapshot ("nodes configuration").
//!
//! Consumed read-only by the placement layer. A snapshot tells which shards of
//! a storage set are writable members at the time an epoch's selector is built,
//! and where each node sits in the failure-domain hierarchy.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::{NodeLocation, NodeLocationScope};
use crate::node::{Node, NodeId, ShardId, StorageSet};

/// Immutable, versioned view of cluster membership.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesConfiguration {
    #[serde(default)]
    version: u64,
    #[serde(with = "nodes_serde")]
    nodes: BTreeMap<NodeId, Node>,
}

impl NodesConfiguration {
    pub fn builder() -> NodesConfigurationBuilder {
        NodesConfigurationBuilder::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn location_of(&self, id: NodeId) -> Option<&NodeLocation> {
        self.nodes.get(&id).and_then(|node| node.location.as_ref())
    }

    /// True if the shard exists in this snapshot.
    pub fn contains_shard(&self, shard: ShardId) -> bool {
        self.nodes
            .get(&shard.node)
            .map(|node| shard.shard < node.num_shards)
            .unwrap_or(false)
    }

    /// Shards of `storage_set` that are writable members, in storage-set order.
    pub fn writer_view(&self, storage_set: &[ShardId]) -> StorageSet {
        storage_set
            .iter()
            .copied()
            .filter(|shard| {
                self.contains_shard(*shard)
                    && self
                        .nodes
                        .get(&shard.node)
                        .map(|node| node.storage_state.can_write_to())
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Failure domain of `shard` at `scope`.
    ///
    /// NODE scope always resolves to the node itself. Wider scopes resolve to
    /// the location prefix, or `None` when the node has no label there.
    pub fn domain_of(&self, shard: ShardId, scope: NodeLocationScope) -> Option<String> {
        match scope {
            NodeLocationScope::Node => self.nodes.get(&shard.node).map(|node| node.id.to_string()),
            _ => self.location_of(shard.node)?.domain(scope),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: NodesConfiguration = serde_json::from_str(raw)?;
        Ok(config)
    }
}

/// Builder for `NodesConfiguration`.
#[derive(Debug, Default)]
pub struct NodesConfigurationBuilder {
    version: u64,
    nodes: BTreeMap<NodeId, Node>,
    error: Option<Error>,
}

impl NodesConfigurationBuilder {
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a node. Adding the same id twice is an error reported by `build`.
    pub fn add_node(mut self, node: Node) -> Self {
        if self.nodes.contains_key(&node.id) && self.error.is_none() {
            self.error = Some(Error::Topology(format!("node {} added twice", node.id)));
        }
        self.nodes.insert(node.id, node);
        self
    }

    /// Add a writable node at `location` with `num_shards` shards.
    pub fn add_storage_node(self, id: u16, location: &str, num_shards: u16) -> Self {
        match Node::with_location(NodeId(id), format!("node{}", id), location, num_shards) {
            Ok(node) => self.add_node(node),
            Err(err) => {
                let mut this = self;
                this.error.get_or_insert(err);
                this
            }
        }
    }

    pub fn build(self) -> Result<NodesConfiguration> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(NodesConfiguration {
            version: self.version,
            nodes: self.nodes,
        })
    }
}

/// Nodes travel as a list; the map key is the node's own id.
mod nodes_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nodes: &BTreeMap<NodeId, Node>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(nodes.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<BTreeMap<NodeId, Node>, D::Error> {
        let nodes = Vec::<Node>::deserialize(deserializer)?;
        Ok(nodes.into_iter().map(|node| (node.id, node)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StorageState;

    fn config() -> NodesConfiguration {
        NodesConfiguration::builder()
            .with_version(7)
            .add_storage_node(1, "eu.c1.row1.rack1", 2)
            .add_storage_node(2, "eu.c1.row1.rack2", 2)
            .add_node(
                Node::with_location(NodeId(3), "node3", "eu.c1.row2.rack3", 2)
                    .unwrap()
                    .with_storage_state(StorageState::ReadOnly),
            )
            .add_node(Node::new(NodeId(4), "node4"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_writer_view_filters_membership() {
        let config = config();
        let set = vec![
            ShardId::new(1, 0),
            ShardId::new(1, 5), // no such shard
            ShardId::new(3, 0), // read-only
            ShardId::new(9, 0), // unknown node
            ShardId::new(2, 1),
        ];
        assert_eq!(config.writer_view(&set), vec![ShardId::new(1, 0), ShardId::new(2, 1)]);
        assert_eq!(config.version(), 7);
    }

    #[test]
    fn test_domain_of() {
        let config = config();
        assert_eq!(config.domain_of(ShardId::new(1, 1), NodeLocationScope::Node).as_deref(), Some("N1"));
        assert_eq!(
            config.domain_of(ShardId::new(1, 1), NodeLocationScope::Row).as_deref(),
            Some("eu.c1.row1")
        );
        assert_eq!(config.domain_of(ShardId::new(4, 0), NodeLocationScope::Rack), None);
        assert_eq!(config.domain_of(ShardId::new(9, 0), NodeLocationScope::Node), None);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let result = NodesConfiguration::builder()
            .add_storage_node(1, "eu.c1.row1.rack1", 1)
            .add_storage_node(1, "eu.c1.row1.rack2", 1)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json() {
        let raw = r#"{
            "version": 3,
            "nodes": [
                {"id": 1, "location": "eu.c1.row1.rack1", "num_shards": 2},
                {"id": 2, "location": "eu.c1.row1.rack2", "storage_state": "read_only"}
            ]
        }"#;
        let config = NodesConfiguration::from_json(raw).unwrap();
        assert_eq!(config.node_count(), 2);
        assert!(config.contains_shard(ShardId::new(1, 1)));
        assert!(!config.contains_shard(ShardId::new(2, 1)));
        assert_eq!(config.writer_view(&[ShardId::new(1, 0), ShardId::new(2, 0)]), vec![ShardId::new(1, 0)]);
    }
}
