//! Replication property: required number of distinct domains per scope.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::location::NodeLocationScope;

/// Required replication per failure-domain scope.
///
/// `{rack: 3, node: 5}` means every copyset must hold copies on at least five
/// distinct nodes spread over at least three distinct racks.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicationProperty {
    factors: BTreeMap<NodeLocationScope, usize>,
}

impl ReplicationProperty {
    /// Largest factor a property may carry.
    pub const MAX_REPLICATION: usize = 127;

    pub fn new() -> Self {
        Self::default()
    }

    /// Single-scope property `{scope: factor}`.
    pub fn simple(scope: NodeLocationScope, factor: usize) -> Self {
        Self::new().with(scope, factor)
    }

    /// Set the factor for `scope`, replacing any previous value.
    pub fn with(mut self, scope: NodeLocationScope, factor: usize) -> Self {
        self.factors.insert(scope, factor);
        self
    }

    pub fn factor(&self, scope: NodeLocationScope) -> Option<usize> {
        self.factors.get(&scope).copied()
    }

    /// Configured (scope, factor) pairs, narrowest scope first.
    pub fn iter(&self) -> impl Iterator<Item = (NodeLocationScope, usize)> + '_ {
        self.factors.iter().map(|(scope, factor)| (*scope, *factor))
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Total number of copies a record needs: the largest configured factor.
    pub fn replication_factor(&self) -> usize {
        self.factors.values().copied().max().unwrap_or(0)
    }

    /// Broadest scope that actually requires spreading (factor > 1), or NODE.
    pub fn biggest_replication_scope(&self) -> NodeLocationScope {
        self.factors
            .iter()
            .rev()
            .find(|(_, factor)| **factor > 1)
            .map(|(scope, _)| *scope)
            .unwrap_or(NodeLocationScope::Node)
    }

    /// Reduce the property to a single `(scope, factor)` pair, if it has one.
    ///
    /// `r` copies across `r` distinct domains at scope S already implies `r`
    /// distinct domains at every narrower scope, so a property reduces when its
    /// broadest spreading scope carries the total replication factor.
    pub fn to_legacy(&self) -> Option<(NodeLocationScope, usize)> {
        let total = self.replication_factor();
        if total == 0 {
            return None;
        }
        if total == 1 {
            return Some((NodeLocationScope::Node, 1));
        }
        let scope = self.biggest_replication_scope();
        match self.factor(scope) {
            Some(factor) if factor == total => Some((scope, factor)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.factors.is_empty() {
            return Err(Error::InvalidReplication("no scope configured".into()));
        }
        for (scope, factor) in &self.factors {
            if *factor == 0 {
                return Err(Error::InvalidReplication(format!("zero factor at scope {}", scope)));
            }
            if *factor > Self::MAX_REPLICATION {
                return Err(Error::InvalidReplication(format!(
                    "factor {} at scope {} exceeds {}",
                    factor,
                    scope,
                    Self::MAX_REPLICATION
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(NodeLocationScope, usize)> for ReplicationProperty {
    fn from_iter<I: IntoIterator<Item = (NodeLocationScope, usize)>>(iter: I) -> Self {
        Self {
            factors: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ReplicationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (scope, factor)) in self.factors.iter().rev().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", scope, factor)?;
        }
        f.write_str("}")
    }
}
