use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tare")]
#[command(about = "Operate the Tare sync queue, conflict log and backups")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and drive the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect recorded sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Write and inspect backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Replace local data with a backup file
    Restore {
        /// Backup file to restore
        #[arg(value_name = "PATH", required_unless_present = "auto")]
        path: Option<PathBuf>,
        /// Search for a backup file and restore it if local data is empty
        #[arg(long, conflicts_with = "path")]
        auto: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Run auto backup and the queue worker until interrupted
    Daemon,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show queue counters and recent events
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued items
    List {
        /// Number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue waste-document generation for a weigh ticket
    EnqueueDocument {
        /// Weigh ticket id
        ticket_id: String,
        /// Attempt budget (defaults to the configured value)
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,
    },
    /// Delete queue items and events past the retention window
    Cleanup,
    /// Attempt every ready item once
    Run {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List the most recent conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count conflicts from the last 24 hours
    Count,
    /// Delete conflicts older than a week
    Cleanup,
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Write a backup now
    Now,
    /// Show tier availability and the latest backup
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List backup files found on disk
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the backup file auto-restore would pick
    Detect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
