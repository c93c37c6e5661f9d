//! Command-line arguments and the cluster description file.

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use corelib::{EpochMetaData, LogId, NodeId, NodesConfiguration};
use replication::{LogAttributes, Settings};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(name = "copyset")]
#[command(version, about = "Copyset selection for replicated logs", long_about = None)]
pub struct CliConfig {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn run(self) -> anyhow::Result<()> {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();

        let result = self.command.execute()?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(())
    }
}

/// Everything needed to build a copyset manager for one epoch, as read from
/// a JSON file.
///
/// ```json
/// {
///   "log_id": 42,
///   "nodes": { "version": 3, "nodes": [ ... ] },
///   "epoch": {
///     "epoch": 7,
///     "shards": [{"node": 1, "shard": 0}, {"node": 2, "shard": 0}],
///     "replication": {"node": 2},
///     "weights": {"N1:S0": 2.0, "N2:S0": 1.0}
///   },
///   "settings": { "sticky_copysets": true },
///   "local_node": 1
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterDescription {
    #[serde(default)]
    pub log_id: Option<LogId>,
    pub nodes: NodesConfiguration,
    pub epoch: EpochMetaData,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub log_attrs: Option<LogAttributes>,
    #[serde(default)]
    pub local_node: Option<NodeId>,
}

impl ClusterDescription {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn log_id(&self) -> LogId {
        self.log_id.unwrap_or(LogId(1))
    }
}
