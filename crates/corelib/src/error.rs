//! Error types for the core library.

use std::fmt;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or loading the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Location string could not be parsed
    InvalidLocation(String),
    /// Replication property is empty or carries a zero factor
    InvalidReplication(String),
    /// Node is not part of the topology snapshot
    UnknownNode(String),
    /// Topology snapshot is inconsistent
    Topology(String),
    /// Cluster description could not be loaded
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLocation(msg) => write!(f, "Invalid location: {}", msg),
            Error::InvalidReplication(msg) => write!(f, "Invalid replication property: {}", msg),
            Error::UnknownNode(msg) => write!(f, "Unknown node: {}", msg),
            Error::Topology(msg) => write!(f, "Topology error: {}", msg),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
