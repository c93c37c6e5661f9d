//! Error types for copyset selection.

use corelib::NodeLocationScope;

/// A selection call could not produce a valid copyset.
///
/// Both kinds are recoverable: the append path may retry once health or
/// membership improves. Selectors never retry internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("insufficient writable shards: need {required}, have {available}")]
    InsufficientWritableShards { required: usize, available: usize },

    #[error("insufficient writable {scope} domains: need {required}, have {available}")]
    InsufficientDomains {
        scope: NodeLocationScope,
        required: usize,
        available: usize,
    },
}

/// The epoch metadata cannot be served by any selector. Fatal for the epoch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("scope {0} is not a failure-domain scope for cross-domain selection")]
    UnsupportedScope(NodeLocationScope),

    #[error("epoch storage set is empty")]
    EmptyStorageSet,

    #[error("invalid epoch metadata: {0}")]
    InvalidMetadata(#[from] corelib::Error),
}

/// Any error surfaced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}
