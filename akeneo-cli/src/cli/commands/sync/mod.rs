//! `sync` command definitions

use std::path::PathBuf;

use clap::{Args, Subcommand};

mod handler;
pub use handler::handle_sync_command;

#[derive(Debug, Subcommand)]
pub enum SyncCommands {
    /// Synchronize every hierarchy containing an entity changed since a timestamp
    Since(SinceArgs),
    /// Synchronize one hierarchy by its root key
    Hierarchy(HierarchyArgs),
}

#[derive(Debug, Args)]
pub struct SinceArgs {
    /// Lower bound of the change window, `YYYY-MM-DD HH:MM:SS`
    pub since: String,

    /// Changed entities requested per page (overrides the config file)
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct HierarchyArgs {
    /// Product identifier or product model code of the hierarchy to copy
    pub key: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print per-hierarchy progress
    #[arg(long, short)]
    pub verbose: bool,
}
