//! Construction of selectors and managers for an epoch.
//!
//! The factory holds no state. Given the epoch metadata and the settings it
//! picks the strategy that fits the shape of the replication property:
//!
//! 1. Weighted, if the property does not reduce to one `(scope, factor)`
//!    pair, if the epoch carries weights, or if weighted selection is forced
//! 2. Linear, if the pair's scope is NODE or its factor is 1
//! 3. CrossDomain otherwise

use std::sync::Arc;

use corelib::{EpochMetaData, LogId, NodeId, NodeLocationScope, NodeSetState, NodesConfiguration};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::manager::{CopySetManager, PassThroughCopySetManager, StickyCopySetManager};
use crate::selector::{CrossDomainSelector, LinearSelector, Selector, WeightedSelector};
use crate::settings::{LogAttributes, Settings};
use crate::stats::SelectionStats;

/// Everything a selector for one epoch of one log is built from.
#[derive(Debug, Clone)]
pub struct SelectorContext<'a> {
    pub log_id: LogId,
    pub epoch: &'a EpochMetaData,
    pub nodeset_state: Arc<NodeSetState>,
    pub config: &'a NodesConfiguration,
    /// Node running the sequencer, for locality-aware placement.
    pub my_node_id: Option<NodeId>,
    pub log_attrs: Option<&'a LogAttributes>,
    pub settings: &'a Settings,
    pub stats: Arc<SelectionStats>,
}

pub struct CopySetSelectorFactory;

impl CopySetSelectorFactory {
    /// Build the selector matching the epoch's replication property.
    pub fn create(ctx: &SelectorContext<'_>) -> Result<Selector, ConfigurationError> {
        ctx.epoch.validate()?;
        if ctx.epoch.shards.is_empty() {
            return Err(ConfigurationError::EmptyStorageSet);
        }
        let replication = &ctx.epoch.replication;
        let legacy = replication.to_legacy();

        let force_weighted = ctx.settings.force_weighted(ctx.log_attrs);
        let (scope, factor) = match legacy {
            Some(pair) if ctx.epoch.weights.is_empty() && !force_weighted => pair,
            _ => {
                let locality_enabled =
                    replication.biggest_replication_scope() >= ctx.settings.copyset_locality_min_scope;
                // Internal logs have small nodesets relative to their
                // replication and little traffic; balance warnings are noise.
                let print_bias_warnings = !ctx.log_id.is_metadata_log() && !ctx.log_id.is_internal();
                debug!(
                    log_id = %ctx.log_id,
                    %replication,
                    locality_enabled,
                    print_bias_warnings,
                    "using weighted copyset selector"
                );
                return Ok(Selector::Weighted(WeightedSelector::new(
                    ctx.log_id,
                    ctx.epoch,
                    Arc::clone(&ctx.nodeset_state),
                    ctx.config,
                    ctx.my_node_id,
                    locality_enabled,
                    Arc::clone(&ctx.stats),
                    print_bias_warnings,
                )));
            }
        };

        let writable = ctx.config.writer_view(&ctx.epoch.shards);
        if scope == NodeLocationScope::Node || factor == 1 {
            debug!(log_id = %ctx.log_id, factor, "using linear copyset selector");
            return Ok(Selector::Linear(LinearSelector::new(
                factor,
                writable,
                Arc::clone(&ctx.nodeset_state),
            )));
        }

        debug!(log_id = %ctx.log_id, %scope, factor, "using cross-domain copyset selector");
        Ok(Selector::CrossDomain(CrossDomainSelector::new(
            ctx.log_id,
            &writable,
            Arc::clone(&ctx.nodeset_state),
            ctx.config,
            factor,
            scope,
        )?))
    }

    /// Build a selector and wrap it in the manager the settings ask for.
    ///
    /// The epoch's storage set is registered against `config` so callers can
    /// later ask the manager whether a newer snapshot still matches.
    pub fn create_manager(ctx: &SelectorContext<'_>) -> Result<CopySetManager, ConfigurationError> {
        let selector = Self::create(ctx)?;
        let sticky = ctx.settings.sticky(ctx.log_attrs);
        let mut manager = if sticky.enabled {
            debug!(
                log_id = %ctx.log_id,
                block_size = sticky.block_size,
                block_max_time_ms = sticky.block_max_time.as_millis() as u64,
                "using sticky copysets"
            );
            CopySetManager::Sticky(StickyCopySetManager::from_config(
                selector,
                Arc::clone(&ctx.stats),
                sticky,
            ))
        } else {
            CopySetManager::PassThrough(PassThroughCopySetManager::new(selector, Arc::clone(&ctx.stats)))
        };
        manager.prepare_config_match_check(&ctx.epoch.shards, ctx.config);
        Ok(manager)
    }
}
