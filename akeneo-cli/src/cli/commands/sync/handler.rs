//! Sync command handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use colored::*;
use tokio_util::sync::CancellationToken;

use super::{CommonArgs, HierarchyArgs, SinceArgs, SyncCommands};
use crate::api::PimClient;
use crate::config::Config;
use crate::sync::{
    PimDestinationRepository, PimSourceRepository, SyncEngine, SyncReport,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub async fn handle_sync_command(command: SyncCommands) -> Result<()> {
    match command {
        SyncCommands::Since(args) => handle_since(args).await,
        SyncCommands::Hierarchy(args) => handle_hierarchy(args).await,
    }
}

async fn handle_since(args: SinceArgs) -> Result<()> {
    if args.common.no_color {
        colored::control::set_override(false);
    }

    NaiveDateTime::parse_from_str(&args.since, TIMESTAMP_FORMAT).with_context(|| {
        format!(
            "invalid timestamp '{}', expected format {}",
            args.since, TIMESTAMP_FORMAT
        )
    })?;

    let config = Config::load(args.common.config.as_deref())?;
    let batch_size = args.batch_size.unwrap_or(config.sync.batch_size);
    let engine = build_engine(&config, batch_size)?;
    let cancel = cancel_on_ctrl_c();

    if args.common.verbose {
        println!(
            "Syncing hierarchies changed since {} (batch size {})",
            args.since.cyan(),
            batch_size
        );
    }

    let report = engine.sync_since(&args.since, &cancel).await?;
    render_report(&report);

    if !report.success {
        anyhow::bail!("sync completed with {} error(s)", report.errors.len());
    }
    Ok(())
}

async fn handle_hierarchy(args: HierarchyArgs) -> Result<()> {
    if args.common.no_color {
        colored::control::set_override(false);
    }

    let config = Config::load(args.common.config.as_deref())?;
    let engine = build_engine(&config, config.sync.batch_size)?;
    let cancel = cancel_on_ctrl_c();

    if args.common.verbose {
        println!("Syncing hierarchy {}", args.key.cyan());
    }

    let report = engine.sync_hierarchy(&args.key, &cancel).await;
    render_report(&report);

    if !report.success {
        anyhow::bail!("sync completed with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn build_engine(config: &Config, batch_size: usize) -> Result<SyncEngine> {
    let source_client =
        PimClient::new(config.source.clone()).context("building source client")?;
    let dest_client =
        PimClient::new(config.destination.clone()).context("building destination client")?;

    Ok(SyncEngine::new(
        Arc::new(PimSourceRepository::new(source_client)),
        Arc::new(PimDestinationRepository::new(dest_client)),
        batch_size,
    ))
}

/// Cancel the returned token on the first Ctrl-C so the engine stops
/// between nodes instead of mid-write.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Cancelling after the current node...".yellow());
            handle.cancel();
        }
    });
    cancel
}

fn render_report(report: &SyncReport) {
    println!();
    println!(
        "Synced {} product model(s) and {} product(s) ({} total)",
        report.models_synced.to_string().bold(),
        report.products_synced.to_string().bold(),
        report.total_synced()
    );

    if report.errors.is_empty() {
        println!("{}", "Completed without errors".green());
        return;
    }

    println!(
        "{}",
        format!("{} node(s) failed:", report.errors.len()).red().bold()
    );
    for error in &report.errors {
        println!("  {} {}", error.node.red(), error.message.dimmed());
    }
}
