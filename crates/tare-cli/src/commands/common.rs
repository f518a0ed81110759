use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tare_core::backup::{BackupCandidate, BackupEngine};
use tare_core::config::TareConfig;
use tare_core::models::{ConflictRecord, QueueItem};
use tare_core::restore::RestorePrompt;
use tare_core::services::DatabaseService;
use tare_core::sync::{
    BroadcastWakePort, ConflictResolver, HttpDocumentClient, SyncQueue, SyncWorker, WakePort,
};

use crate::error::CliError;

/// Paths and settings shared by every command
pub struct Context {
    pub db_path: PathBuf,
    pub config: TareConfig,
}

impl Context {
    pub fn load(db_path: Option<PathBuf>, config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => TareConfig::load_from_path(path)?,
            None => TareConfig::load()?,
        };
        Ok(Self {
            db_path: resolve_db_path(db_path),
            config,
        })
    }

    pub async fn open(&self) -> Result<DatabaseService, CliError> {
        open_database(&self.db_path).await
    }

    pub fn queue(&self, db: DatabaseService, wake: Arc<dyn WakePort>) -> SyncQueue {
        SyncQueue::new(db, wake)
            .with_max_attempts(self.config.queue.max_attempts)
            .with_retention_days(self.config.queue.retention_days)
    }

    /// Queue worker wired to the document relay when one is configured
    pub fn worker(&self, db: DatabaseService, queue: SyncQueue) -> Result<SyncWorker, CliError> {
        let mut worker = SyncWorker::new(db.clone(), queue, ConflictResolver::new(db))
            .with_poll_interval(self.config.poll_interval());
        if let Some(base_url) = self.config.relay.base_url.as_deref() {
            let client = HttpDocumentClient::new(base_url)?;
            worker = worker.with_documents(Arc::new(client), self.config.relay_token());
        }
        Ok(worker)
    }

    pub fn engine(&self, db: DatabaseService) -> BackupEngine {
        BackupEngine::from_config(db, &self.config)
    }
}

pub fn new_wake_port() -> Arc<dyn WakePort> {
    Arc::new(BroadcastWakePort::new())
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TARE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tare")
        .join("tare.db")
}

pub async fn open_database(path: &Path) -> Result<DatabaseService, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(DatabaseService::open_path(path.to_path_buf()).await?)
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if timestamp_ms > now_ms {
        let ahead = timestamp_ms - now_ms;
        if ahead < minute {
            "now".to_string()
        } else if ahead < hour {
            format!("in {}m", ahead / minute)
        } else if ahead < day {
            format!("in {}h", ahead / hour)
        } else {
            format!("in {}d", ahead / day)
        }
    } else if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    }
}

pub fn format_queue_item_lines(items: &[QueueItem], now_ms: i64) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let next = if item.attempt_count >= item.max_attempts {
                "exhausted".to_string()
            } else if item.is_ready(now_ms) {
                "ready".to_string()
            } else {
                format_relative_time(item.next_attempt, now_ms)
            };
            let mut line = format!(
                "{:>5}  {:<40}  {}/{}  {next}",
                item.id, item.tag, item.attempt_count, item.max_attempts
            );
            if let Some(error) = item.last_error.as_deref() {
                line.push_str("  ");
                line.push_str(&tare_core::util::compact_text(error));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<11}  {}/{}  local v{} server v{}",
                format_timestamp(conflict.created_at),
                conflict.resolution.as_str(),
                conflict.collection,
                conflict.record_id,
                conflict.local_version,
                conflict.server_version,
            )
        })
        .collect()
}

pub fn format_candidate_line(candidate: &BackupCandidate) -> String {
    format!(
        "{}  {:>10}  {}",
        format_timestamp(candidate.modified_ms),
        format_size(candidate.size),
        candidate.path.display()
    )
}

/// Restore confirmation on the controlling terminal
pub struct TerminalPrompt {
    assume_yes: bool,
}

impl TerminalPrompt {
    pub const fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    pub async fn ask(&self, question: String) -> bool {
        if self.assume_yes {
            return true;
        }
        if !io::stdin().is_terminal() {
            tracing::warn!("Not a terminal, declining: {question}");
            return false;
        }
        tokio::task::spawn_blocking(move || read_yes_no(&question))
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl RestorePrompt for TerminalPrompt {
    async fn confirm(&self, candidate: &BackupCandidate) -> bool {
        self.ask(format!(
            "Found backup {} from {}. Restore it?",
            candidate.path.display(),
            format_timestamp(candidate.modified_ms)
        ))
        .await
    }

    async fn report_failure(&self, message: &str) {
        eprintln!("{message}");
    }
}

fn read_yes_no(question: &str) -> bool {
    let mut stderr = io::stderr();
    if write!(stderr, "{question} [y/N] ").and_then(|()| stderr.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    parse_yes(&answer)
}

pub fn parse_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
