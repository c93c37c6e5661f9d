//! Subcommands and their results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Subcommand;
use corelib::{NodeSetState, NotAvailableReason, ShardId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use replication::{
    CopySet, CopySetManager, CopySetSelector, CopySetSelectorFactory, SelectionStats, SelectorContext, StatsSnapshot,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ClusterDescription;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Draw copysets through the copyset manager for the epoch described in a cluster file
    Select {
        /// Cluster description (JSON)
        #[arg(short, long, value_name = "FILE")]
        cluster: PathBuf,

        /// RNG seed
        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Number of copysets to draw
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Shards to treat as unwritable (e.g. N3:S0)
        #[arg(long, value_name = "SHARD")]
        down: Vec<ShardId>,

        /// Shards to treat as slow but writable
        #[arg(long, value_name = "SHARD")]
        slow: Vec<ShardId>,
    },

    /// Run appends through the copyset manager and report per-shard load
    Simulate {
        /// Cluster description (JSON)
        #[arg(short, long, value_name = "FILE")]
        cluster: PathBuf,

        /// RNG seed
        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Number of records to append
        #[arg(short, long, default_value_t = 10_000)]
        records: usize,

        /// Simulated time between appends, in milliseconds
        #[arg(long, default_value_t = 1)]
        interval_ms: u64,

        /// Shards to treat as unwritable (e.g. N3:S0)
        #[arg(long, value_name = "SHARD")]
        down: Vec<ShardId>,

        /// Shards to treat as slow but writable
        #[arg(long, value_name = "SHARD")]
        slow: Vec<ShardId>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResult {
    Selected {
        selector: String,
        copysets: Vec<Outcome>,
    },
    Simulated {
        selector: String,
        sticky: bool,
        records: usize,
        failures: usize,
        /// Records stored per shard, keyed by `N<node>:S<shard>`.
        load: BTreeMap<String, u64>,
        stats: StatsSnapshot,
    },
}

/// One selection attempt.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Copyset(CopySet),
    Error(String),
}

impl Command {
    pub fn execute(&self) -> anyhow::Result<CommandResult> {
        match self {
            Command::Select {
                cluster,
                seed,
                count,
                down,
                slow,
            } => {
                let desc = ClusterDescription::load(cluster)?;
                let mut run = Run::new(&desc, down, slow)?;
                let mut rng = StdRng::seed_from_u64(*seed);
                let copysets = run.select(*count, &mut rng);
                Ok(CommandResult::Selected {
                    selector: run.selector_name(),
                    copysets,
                })
            }
            Command::Simulate {
                cluster,
                seed,
                records,
                interval_ms,
                down,
                slow,
            } => {
                let desc = ClusterDescription::load(cluster)?;
                let mut run = Run::new(&desc, down, slow)?;
                let mut rng = StdRng::seed_from_u64(*seed);
                let (load, failures) = run.simulate(*records, Duration::from_millis(*interval_ms), &mut rng)?;
                info!(records, failures, "simulation finished");
                Ok(CommandResult::Simulated {
                    selector: run.selector_name(),
                    sticky: run.manager.is_sticky(),
                    records: *records,
                    failures,
                    load,
                    stats: run.stats.snapshot(),
                })
            }
        }
    }
}

/// Manager plus the health and stats it was built with.
struct Run {
    manager: CopySetManager,
    stats: Arc<SelectionStats>,
}

impl Run {
    fn new(desc: &ClusterDescription, down: &[ShardId], slow: &[ShardId]) -> anyhow::Result<Self> {
        let state = Arc::new(NodeSetState::new(&desc.epoch.shards));
        mark(&state, down, NotAvailableReason::StoreDisabled);
        mark(&state, slow, NotAvailableReason::Slow);

        let stats = Arc::new(SelectionStats::new());
        let ctx = SelectorContext {
            log_id: desc.log_id(),
            epoch: &desc.epoch,
            nodeset_state: state,
            config: &desc.nodes,
            my_node_id: desc.local_node,
            log_attrs: desc.log_attrs.as_ref(),
            settings: &desc.settings,
            stats: Arc::clone(&stats),
        };
        let manager = CopySetSelectorFactory::create_manager(&ctx)?;
        Ok(Self { manager, stats })
    }

    fn selector_name(&self) -> String {
        self.manager.selector().name().to_string()
    }

    /// Draw `count` copysets for records appended back to back.
    fn select(&mut self, count: usize, rng: &mut StdRng) -> Vec<Outcome> {
        let now = Instant::now();
        (0..count)
            .map(|_| match self.manager.get_copyset(now, rng) {
                Ok(copyset) => Outcome::Copyset(copyset),
                Err(err) => Outcome::Error(err.to_string()),
            })
            .collect()
    }

    fn simulate(
        &mut self,
        records: usize,
        interval: Duration,
        rng: &mut StdRng,
    ) -> anyhow::Result<(BTreeMap<String, u64>, usize)> {
        let mut load: BTreeMap<String, u64> = BTreeMap::new();
        let mut failures = 0;
        let mut now = Instant::now();
        for record in 0..records {
            if record > 0 {
                now = now
                    .checked_add(interval)
                    .ok_or_else(|| anyhow::anyhow!("simulated clock overflows after {} records", record))?;
            }
            match self.manager.get_copyset(now, rng) {
                Ok(copyset) => {
                    for shard in copyset.iter() {
                        *load.entry(shard.to_string()).or_default() += 1;
                    }
                }
                Err(_) => failures += 1,
            }
        }
        Ok((load, failures))
    }
}

fn mark(state: &NodeSetState, shards: &[ShardId], reason: NotAvailableReason) {
    for shard in shards {
        if !state.set(*shard, reason) {
            warn!(%shard, "shard is not part of the epoch's storage set, ignoring");
        }
    }
}
