//! Tare CLI - operate the sync queue, conflict log and backups
//!
//! `tare daemon` runs the scheduled backup and the queue worker; the other
//! commands inspect or drive them one step at a time.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::backup::run_backup;
use crate::commands::common::Context;
use crate::commands::conflicts::run_conflicts;
use crate::commands::daemon::run_daemon;
use crate::commands::queue::run_queue;
use crate::commands::restore::run_restore;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        if let Some(hint) = error.hint() {
            eprintln!("{hint}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "tare=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let ctx = Context::load(cli.db_path, cli.config.as_deref())?;

    match cli.command {
        Commands::Queue { command } => run_queue(command, &ctx).await?,
        Commands::Conflicts { command } => run_conflicts(command, &ctx).await?,
        Commands::Backup { command } => run_backup(command, &ctx).await?,
        Commands::Restore { path, auto, yes } => {
            run_restore(path.as_deref(), auto, yes, &ctx).await?;
        }
        Commands::Daemon => run_daemon(&ctx).await?,
    }

    Ok(())
}
