//! akeneo-cli entry point

mod api;
mod cli;
mod config;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cli::commands::sync::{handle_sync_command, SyncCommands};

#[derive(Debug, Parser)]
#[command(
    name = "akeneo-cli",
    version,
    about = "Migrate catalog data between Akeneo PIM instances"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Synchronize catalog data from the source instance to the destination
    #[command(subcommand)]
    Sync(SyncCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(command) => handle_sync_command(command).await,
    }
}
