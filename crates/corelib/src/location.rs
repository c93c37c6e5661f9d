//! Failure-domain scopes and node locations.
//!
//! A location is a dotted path `region.cluster.row.rack`. The domain of a node
//! at scope S is the prefix of its path up to S, so two nodes in different
//! regions are also in different clusters, rows and racks. Selectors rely on
//! that nesting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Failure-domain scope, ordered from narrowest to broadest.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLocationScope {
    Node,
    Rack,
    Row,
    Cluster,
    Region,
}

impl NodeLocationScope {
    /// All scopes, narrowest first.
    pub const ALL: [NodeLocationScope; 5] = [
        NodeLocationScope::Node,
        NodeLocationScope::Rack,
        NodeLocationScope::Row,
        NodeLocationScope::Cluster,
        NodeLocationScope::Region,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeLocationScope::Node => "node",
            NodeLocationScope::Rack => "rack",
            NodeLocationScope::Row => "row",
            NodeLocationScope::Cluster => "cluster",
            NodeLocationScope::Region => "region",
        }
    }

    /// Position of this scope's label in a location path. `None` for NODE,
    /// which is identified by the node itself.
    fn label_index(&self) -> Option<usize> {
        match self {
            NodeLocationScope::Node => None,
            NodeLocationScope::Rack => Some(3),
            NodeLocationScope::Row => Some(2),
            NodeLocationScope::Cluster => Some(1),
            NodeLocationScope::Region => Some(0),
        }
    }
}

impl fmt::Display for NodeLocationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeLocationScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NodeLocationScope::ALL
            .into_iter()
            .find(|scope| scope.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidLocation(format!("unknown scope '{}'", s)))
    }
}

/// Location of a node: one label per scope from region down to rack.
///
/// Trailing labels may be empty (`"eu.c1.."` has no row or rack), but a
/// set label may not follow an empty one.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeLocation {
    labels: [String; NodeLocation::NUM_LABELS],
}

impl NodeLocation {
    pub const NUM_LABELS: usize = 4;

    /// Domain name at `scope`: the dotted prefix of the path up to that scope.
    ///
    /// Returns `None` for NODE scope and when the label at `scope` is unset.
    pub fn domain(&self, scope: NodeLocationScope) -> Option<String> {
        let idx = scope.label_index()?;
        if self.labels[idx].is_empty() {
            return None;
        }
        Some(self.labels[..=idx].join("."))
    }
}

impl FromStr for NodeLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() > Self::NUM_LABELS {
            return Err(Error::InvalidLocation(format!(
                "'{}' has {} labels, at most {} allowed",
                s,
                parts.len(),
                Self::NUM_LABELS
            )));
        }

        let mut labels: [String; Self::NUM_LABELS] = Default::default();
        let mut seen_empty = false;
        for (idx, part) in parts.iter().enumerate() {
            if part.is_empty() {
                seen_empty = true;
            } else if seen_empty {
                return Err(Error::InvalidLocation(format!(
                    "'{}' sets a label below an empty one",
                    s
                )));
            }
            labels[idx] = part.to_string();
        }
        Ok(Self { labels })
    }
}

impl TryFrom<String> for NodeLocation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeLocation> for String {
    fn from(location: NodeLocation) -> Self {
        location.to_string()
    }
}

impl fmt::Display for NodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.labels.join("."))
    }
}
