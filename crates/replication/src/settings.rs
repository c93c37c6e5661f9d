//! Placement knobs, read once per epoch when the selector is built.

use std::time::Duration;

use corelib::NodeLocationScope;
use serde::{Deserialize, Serialize};

/// Cluster-wide placement settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Use the weighted selector even for simple replication properties.
    pub weighted_copyset_selector: bool,
    /// Locality-aware placement is enabled when the property's biggest
    /// replication scope is at least this wide.
    pub copyset_locality_min_scope: NodeLocationScope,
    /// Reuse copysets across consecutive records.
    pub sticky_copysets: bool,
    /// Records per sticky block.
    pub sticky_copysets_block_size: usize,
    /// Longest a sticky block may live.
    #[serde(with = "duration_ms", rename = "sticky_copysets_block_max_time_ms")]
    pub sticky_copysets_block_max_time: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            weighted_copyset_selector: false,
            copyset_locality_min_scope: NodeLocationScope::Rack,
            sticky_copysets: false,
            sticky_copysets_block_size: 128,
            sticky_copysets_block_max_time: Duration::from_secs(10),
        }
    }
}

/// Per-log overrides of `Settings`. Unset fields fall back to the settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAttributes {
    pub weighted_copyset_selector: Option<bool>,
    pub sticky_copysets: Option<bool>,
    pub sticky_copysets_block_size: Option<usize>,
    #[serde(with = "option_duration_ms", rename = "sticky_copysets_block_max_time_ms")]
    pub sticky_copysets_block_max_time: Option<Duration>,
}

/// Sticky-copyset configuration resolved for one log.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StickyConfig {
    pub enabled: bool,
    pub block_size: usize,
    pub block_max_time: Duration,
}

impl Settings {
    pub fn force_weighted(&self, attrs: Option<&LogAttributes>) -> bool {
        attrs
            .and_then(|a| a.weighted_copyset_selector)
            .unwrap_or(self.weighted_copyset_selector)
    }

    pub fn sticky(&self, attrs: Option<&LogAttributes>) -> StickyConfig {
        let attrs = attrs.cloned().unwrap_or_default();
        StickyConfig {
            enabled: attrs.sticky_copysets.unwrap_or(self.sticky_copysets),
            block_size: attrs
                .sticky_copysets_block_size
                .unwrap_or(self.sticky_copysets_block_size),
            block_max_time: attrs
                .sticky_copysets_block_max_time
                .unwrap_or(self.sticky_copysets_block_max_time),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
