//! CLI tool for exercising copyset selection against a cluster description.
//!
//! Provides commands for:
//! - Selecting copysets for one epoch of a log
//! - Simulating a stream of appends and reporting per-shard load

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::{CliConfig, ClusterDescription};
