//! Retry scheduler over the durable queue store.
//!
//! Items become ready once `next_attempt` has passed. Failed attempts are
//! rescheduled with capped exponential backoff; an item that runs out of
//! attempts is abandoned and re-registered under a fresh tag so one-shot wake
//! registrations keyed by the old tag are not lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::db::{in_transaction, LibSqlQueueRepository, NewSyncEvent, QueueRepository};
use crate::models::{QueueItem, SyncEvent, SyncEventKind, SyncEventStatus, SyncTask};
use crate::services::DatabaseService;
use crate::util::{now_ms, DAY_MS};
use crate::Result;

use super::backoff::Backoff;
use super::wake::WakePort;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
const RECENT_EVENT_LIMIT: usize = 10;
const RETRY_TAG_MARKER: &str = ":retry-";

/// Aggregate view of the queue for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    /// Items still under their attempt ceiling
    pub pending: u64,
    pub recent_events: Vec<SyncEvent>,
    pub oldest_pending_at: Option<i64>,
    pub last_success_at: Option<i64>,
}

/// What happened to an item after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Rescheduled {
        attempt: u32,
        next_attempt: i64,
    },
    Abandoned {
        replacement_id: i64,
        replacement_tag: String,
    },
    /// The item was already gone
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub items: u64,
    pub events: u64,
}

#[derive(Clone)]
pub struct SyncQueue {
    db: DatabaseService,
    wake: Arc<dyn WakePort>,
    backoff: Backoff,
    default_max_attempts: u32,
    retention_ms: i64,
}

impl SyncQueue {
    pub fn new(db: DatabaseService, wake: Arc<dyn WakePort>) -> Self {
        Self {
            db,
            wake,
            backoff: Backoff::default(),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retention_ms: DAY_MS * i64::from(DEFAULT_RETENTION_DAYS),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_ms = DAY_MS * i64::from(days.max(1));
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn wake_port(&self) -> Arc<dyn WakePort> {
        Arc::clone(&self.wake)
    }

    /// Admit a task under its base tag with the default attempt budget
    pub async fn enqueue_task(&self, task: SyncTask) -> Result<i64> {
        self.enqueue(task.base_tag(), &task, self.default_max_attempts)
            .await
    }

    /// Admit a unit of work. It is ready immediately.
    pub async fn enqueue(&self, tag: &str, task: &SyncTask, max_attempts: u32) -> Result<i64> {
        self.enqueue_at(tag, task, max_attempts, now_ms()).await
    }

    /// Admit a unit of work that first becomes ready at `next_attempt`
    pub async fn enqueue_at(
        &self,
        tag: &str,
        task: &SyncTask,
        max_attempts: u32,
        next_attempt: i64,
    ) -> Result<i64> {
        let max_attempts = max_attempts.max(1);
        let now = now_ms();

        let id = {
            let db = self.db.lock().await;
            let repo = LibSqlQueueRepository::new(db.connection());
            in_transaction(db.connection(), async {
                let id = repo
                    .insert_item_at(tag, task, max_attempts, next_attempt, now)
                    .await?;
                repo.append_event(NewSyncEvent {
                    tag,
                    kind: SyncEventKind::Enqueue,
                    status: SyncEventStatus::Pending,
                    message: format!("Queued with {max_attempts} attempts"),
                    task: Some(task),
                    attempt_number: 0,
                    duration_ms: None,
                    created_at: now,
                })
                .await?;
                Ok(id)
            })
            .await?
        };

        if next_attempt > now {
            tracing::info!("Queued {tag} as item {id}, due at {}", format_time(next_attempt));
        } else {
            tracing::info!("Queued {tag} as item {id}");
        }
        Ok(id)
    }

    /// Queue `task` at `next_attempt` unless its tag already has an item.
    /// Returns the new item id, or `None` when one was already scheduled.
    pub async fn ensure_scheduled(&self, task: SyncTask, next_attempt: i64) -> Result<Option<i64>> {
        let existing = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .count_items_for_base_tag(task.base_tag())
                .await?
        };
        if existing > 0 {
            tracing::debug!("{} already scheduled", task.base_tag());
            return Ok(None);
        }
        self.enqueue_at(task.base_tag(), &task, self.default_max_attempts, next_attempt)
            .await
            .map(Some)
    }

    /// Items due now with attempts left
    pub async fn get_ready_items(&self) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .ready_items(now_ms())
            .await
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).get_item(id).await
    }

    /// Every item, earliest due first
    pub async fn list_items(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_items(limit)
            .await
    }

    /// Record a failed attempt, rescheduling or abandoning the item
    pub async fn mark_attempt_failed(&self, id: i64, error: &str) -> Result<FailureOutcome> {
        let now = now_ms();
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let Some(item) = repo.get_item(id).await? else {
            tracing::warn!("Failure reported for unknown queue item {id}");
            return Ok(FailureOutcome::Missing);
        };

        let attempt = item.attempt_count.saturating_add(1);
        if attempt >= item.max_attempts {
            let replacement_tag = retry_tag(&item.tag);
            let replacement_id = in_transaction(db.connection(), async {
                repo.delete_item(id).await?;
                repo.append_event(NewSyncEvent {
                    tag: &item.tag,
                    kind: SyncEventKind::Abandon,
                    status: SyncEventStatus::Abandoned,
                    message: format!(
                        "Abandoned after {attempt}/{} attempts: {error}; re-registered as {replacement_tag}",
                        item.max_attempts
                    ),
                    task: Some(&item.task),
                    attempt_number: attempt,
                    duration_ms: None,
                    created_at: now,
                })
                .await?;
                let replacement_id = repo
                    .insert_item(&replacement_tag, &item.task, item.max_attempts, now)
                    .await?;
                repo.append_event(NewSyncEvent {
                    tag: &replacement_tag,
                    kind: SyncEventKind::Enqueue,
                    status: SyncEventStatus::Pending,
                    message: format!("Re-registered from {}", item.tag),
                    task: Some(&item.task),
                    attempt_number: 0,
                    duration_ms: None,
                    created_at: now,
                })
                .await?;
                Ok(replacement_id)
            })
            .await?;
            drop(db);

            tracing::warn!(
                "Abandoned {} after {attempt} attempts, re-registered as {replacement_tag}",
                item.tag
            );
            if let Err(error) = self.wake.register_wake(&replacement_tag).await {
                tracing::warn!("Wake registration for {replacement_tag} failed: {error}");
            }

            return Ok(FailureOutcome::Abandoned {
                replacement_id,
                replacement_tag,
            });
        }

        let delay = self.backoff.delay(attempt);
        let next_attempt = now.saturating_add(duration_ms(delay));
        in_transaction(db.connection(), async {
            repo.record_failure(id, attempt, next_attempt, error, now)
                .await?;
            repo.append_event(NewSyncEvent {
                tag: &item.tag,
                kind: SyncEventKind::Attempt,
                status: SyncEventStatus::Failed,
                message: format!(
                    "Attempt {attempt}/{} failed: {error}; next retry at {}",
                    item.max_attempts,
                    format_time(next_attempt)
                ),
                task: Some(&item.task),
                attempt_number: attempt,
                duration_ms: None,
                created_at: now,
            })
            .await
        })
        .await?;

        tracing::info!(
            "Attempt {attempt}/{} of {} failed, retrying in {}s",
            item.max_attempts,
            item.tag,
            delay.as_secs()
        );
        Ok(FailureOutcome::Rescheduled {
            attempt,
            next_attempt,
        })
    }

    /// Remove a completed item and log the success
    pub async fn mark_success(&self, id: i64, duration: Option<Duration>) -> Result<bool> {
        let now = now_ms();
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let Some(item) = repo.get_item(id).await? else {
            tracing::warn!("Success reported for unknown queue item {id}");
            return Ok(false);
        };

        let attempt = item.attempt_count.saturating_add(1);
        in_transaction(db.connection(), async {
            repo.delete_item(id).await?;
            repo.append_event(NewSyncEvent {
                tag: &item.tag,
                kind: SyncEventKind::Attempt,
                status: SyncEventStatus::Success,
                message: format!("Completed on attempt {attempt}"),
                task: Some(&item.task),
                attempt_number: attempt,
                duration_ms: duration.map(duration_ms),
                created_at: now,
            })
            .await
        })
        .await?;

        tracing::info!("Completed {} on attempt {attempt}", item.tag);
        Ok(true)
    }

    pub async fn get_stats(&self) -> Result<QueueStats> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let (total, pending) = repo.item_counts().await?;
        Ok(QueueStats {
            total,
            pending,
            recent_events: repo.recent_events(RECENT_EVENT_LIMIT).await?,
            oldest_pending_at: repo.oldest_pending_created_at().await?,
            last_success_at: repo.last_success_at().await?,
        })
    }

    /// Delete items and events older than the retention window
    pub async fn cleanup_old_events(&self) -> Result<CleanupReport> {
        let cutoff = now_ms().saturating_sub(self.retention_ms);
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let report = CleanupReport {
            items: repo.delete_items_before(cutoff).await?,
            events: repo.delete_events_before(cutoff).await?,
        };
        if report.items > 0 || report.events > 0 {
            tracing::info!(
                "Queue cleanup removed {} items and {} events",
                report.items,
                report.events
            );
        }
        Ok(report)
    }
}

/// `<base>:retry-<uuid>`, where base drops any earlier retry suffix
fn retry_tag(tag: &str) -> String {
    let base = tag.split(RETRY_TAG_MARKER).next().unwrap_or(tag);
    format!("{base}{RETRY_TAG_MARKER}{}", uuid::Uuid::now_v7())
}

pub(super) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| ms.to_string(), |time| time.to_rfc3339())
}
