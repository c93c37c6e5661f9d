//! Core data model for copyset placement.
//!
//! This crate provides the types shared by every placement strategy:
//! - Node, shard and log identifiers
//! - Failure-domain scopes and node locations
//! - Replication properties and per-epoch metadata
//! - The versioned topology snapshot
//! - Live per-shard health (`NodeSetState`)

pub mod epoch;
pub mod error;
pub mod location;
pub mod node;
pub mod nodeset_state;
pub mod replication;
pub mod topology;

pub use epoch::{EpochMetaData, Weights};
pub use error::{Error, Result};
pub use location::{NodeLocation, NodeLocationScope};
pub use node::{LogId, Node, NodeId, ShardId, StorageSet, StorageState};
pub use nodeset_state::{NodeSetState, NodeSetStateRegistry, NotAvailableReason};
pub use replication::ReplicationProperty;
pub use topology::{NodesConfiguration, NodesConfigurationBuilder};
