//! Copyset selection for an append-only log store.
//!
//! This crate decides, for every appended record, which storage shards hold
//! its replicas:
//! - Selectors produce one valid copyset per call (linear, cross-domain,
//!   weighted)
//! - The factory picks a selector from the shape of the replication property
//! - Managers add the per-record policy (pass-through or sticky copysets)

pub mod copyset;
pub mod error;
pub mod factory;
pub mod manager;
pub mod selector;
pub mod settings;
pub mod stats;

pub use copyset::CopySet;
pub use error::{ConfigurationError, ReplicationError, SelectionError};
pub use factory::{CopySetSelectorFactory, SelectorContext};
pub use manager::{CopySetManager, PassThroughCopySetManager, StickyBlock, StickyCopySetManager};
pub use selector::{CopySetSelector, CrossDomainSelector, LinearSelector, Selector, WeightedSelector};
pub use settings::{LogAttributes, Settings, StickyConfig};
pub use stats::{SelectionStats, Stat, StatsSnapshot};
