//! Durable sync queue and event log storage

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{QueueItem, SyncEvent, SyncEventKind, SyncEventStatus, SyncTask};

const ITEM_COLUMNS: &str = "id, tag, payload, attempt_count, max_attempts, next_attempt, last_error, created_at, updated_at";
const EVENT_COLUMNS: &str =
    "id, tag, kind, status, message, payload, attempt_number, duration_ms, created_at";

/// A sync event about to be appended
#[derive(Debug, Clone)]
pub struct NewSyncEvent<'a> {
    pub tag: &'a str,
    pub kind: SyncEventKind,
    pub status: SyncEventStatus,
    pub message: String,
    pub task: Option<&'a SyncTask>,
    pub attempt_number: u32,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
}

/// Trait for queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Insert a new item with zero attempts, due at `now`
    async fn insert_item(
        &self,
        tag: &str,
        task: &SyncTask,
        max_attempts: u32,
        now: i64,
    ) -> Result<i64>;

    /// Insert an item first due at `next_attempt`
    async fn insert_item_at(
        &self,
        tag: &str,
        task: &SyncTask,
        max_attempts: u32,
        next_attempt: i64,
        now: i64,
    ) -> Result<i64>;

    /// Items registered under `base` or one of its retry tags
    async fn count_items_for_base_tag(&self, base: &str) -> Result<u64>;

    /// Fetch an item by id
    async fn get_item(&self, id: i64) -> Result<Option<QueueItem>>;

    /// Items due at `now` with attempts left, earliest first
    async fn ready_items(&self, now: i64) -> Result<Vec<QueueItem>>;

    /// All items, earliest due first
    async fn list_items(&self, limit: usize) -> Result<Vec<QueueItem>>;

    /// Persist the outcome of a failed attempt
    async fn record_failure(
        &self,
        id: i64,
        attempt_count: u32,
        next_attempt: i64,
        last_error: &str,
        now: i64,
    ) -> Result<bool>;

    /// Delete an item, returning whether it existed
    async fn delete_item(&self, id: i64) -> Result<bool>;

    /// Total queue size and items still under their attempt ceiling
    async fn item_counts(&self) -> Result<(u64, u64)>;

    /// Creation time of the oldest item still under its attempt ceiling
    async fn oldest_pending_created_at(&self) -> Result<Option<i64>>;

    /// Delete items created before `cutoff`
    async fn delete_items_before(&self, cutoff: i64) -> Result<u64>;

    /// Append an audit event
    async fn append_event(&self, event: NewSyncEvent<'_>) -> Result<i64>;

    /// Most recent events, newest first
    async fn recent_events(&self, limit: usize) -> Result<Vec<SyncEvent>>;

    /// Time of the most recent `success` event
    async fn last_success_at(&self) -> Result<Option<i64>>;

    /// Delete events created before `cutoff`
    async fn delete_events_before(&self, cutoff: i64) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<QueueItem> {
        let payload: String = row.get(2)?;
        let task: SyncTask = serde_json::from_str(&payload)
            .map_err(|e| Error::Database(format!("invalid queue payload: {e}")))?;
        Ok(QueueItem {
            id: row.get(0)?,
            tag: row.get(1)?,
            task,
            attempt_count: to_u32(row.get(3)?, "attempt_count")?,
            max_attempts: to_u32(row.get(4)?, "max_attempts")?,
            next_attempt: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn parse_event(row: &Row) -> Result<SyncEvent> {
        let kind: String = row.get(2)?;
        let status: String = row.get(3)?;
        let payload: Option<String> = row.get(5)?;
        Ok(SyncEvent {
            id: row.get(0)?,
            tag: row.get(1)?,
            kind: SyncEventKind::parse(&kind)
                .ok_or_else(|| Error::Database(format!("invalid sync event kind: {kind}")))?,
            status: SyncEventStatus::parse(&status)
                .ok_or_else(|| Error::Database(format!("invalid sync event status: {status}")))?,
            message: row.get(4)?,
            // Snapshots are informational; an unreadable one is dropped, not fatal
            task: payload.and_then(|payload| serde_json::from_str(&payload).ok()),
            attempt_number: to_u32(row.get(6)?, "attempt_number")?,
            duration_ms: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    async fn query_items(&self, sql: &str, param: i64) -> Result<Vec<QueueItem>> {
        let mut rows = self.conn.query(sql, [param]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn query_optional_i64(&self, sql: &str) -> Result<Option<i64>> {
        let mut rows = self.conn.query(sql, ()).await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?),
            None => Ok(None),
        }
    }
}

fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Database(format!("{field} out of range: {value}")))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert_item(
        &self,
        tag: &str,
        task: &SyncTask,
        max_attempts: u32,
        now: i64,
    ) -> Result<i64> {
        self.insert_item_at(tag, task, max_attempts, now, now).await
    }

    async fn insert_item_at(
        &self,
        tag: &str,
        task: &SyncTask,
        max_attempts: u32,
        next_attempt: i64,
        now: i64,
    ) -> Result<i64> {
        let payload = serde_json::to_string(task)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue (tag, payload, attempt_count, max_attempts, next_attempt, last_error, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?4, NULL, ?5, ?5)",
                libsql::params![tag, payload, i64::from(max_attempts), next_attempt, now],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn count_items_for_base_tag(&self, base: &str) -> Result<u64> {
        let retry_prefix = format!("{base}:retry-");
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_queue
                 WHERE tag = ?1 OR substr(tag, 1, length(?2)) = ?2",
                libsql::params![base, retry_prefix],
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn get_item(&self, id: i64) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?");
        Ok(self.query_items(&sql, id).await?.into_iter().next())
    }

    async fn ready_items(&self, now: i64) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue
             WHERE next_attempt <= ? AND attempt_count < max_attempts
             ORDER BY next_attempt ASC, id ASC"
        );
        self.query_items(&sql, now).await
    }

    async fn list_items(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue ORDER BY next_attempt ASC, id ASC LIMIT ?"
        );
        self.query_items(&sql, to_limit(limit)).await
    }

    async fn record_failure(
        &self,
        id: i64,
        attempt_count: u32,
        next_attempt: i64,
        last_error: &str,
        now: i64,
    ) -> Result<bool> {
        // MAX keeps next_attempt non-decreasing even if the clock steps back
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET attempt_count = ?1,
                     next_attempt = MAX(next_attempt, ?2),
                     last_error = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                libsql::params![i64::from(attempt_count), next_attempt, last_error, now, id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn delete_item(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id])
            .await?;
        Ok(rows > 0)
    }

    async fn item_counts(&self) -> Result<(u64, u64)> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN attempt_count < max_attempts THEN 1 ELSE 0 END), 0)
                 FROM sync_queue",
                (),
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok((0, 0));
        };
        let total: i64 = row.get(0)?;
        let pending: i64 = row.get(1)?;
        Ok((
            u64::try_from(total).unwrap_or_default(),
            u64::try_from(pending).unwrap_or_default(),
        ))
    }

    async fn oldest_pending_created_at(&self) -> Result<Option<i64>> {
        self.query_optional_i64(
            "SELECT MIN(created_at) FROM sync_queue WHERE attempt_count < max_attempts",
        )
        .await
    }

    async fn delete_items_before(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE created_at < ?", [cutoff])
            .await?;
        Ok(rows)
    }

    async fn append_event(&self, event: NewSyncEvent<'_>) -> Result<i64> {
        let payload = event.task.map(serde_json::to_string).transpose()?;
        self.conn
            .execute(
                "INSERT INTO sync_events (tag, kind, status, message, payload, attempt_number, duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                libsql::params![
                    event.tag,
                    event.kind.as_str(),
                    event.status.as_str(),
                    event.message,
                    payload,
                    i64::from(event.attempt_number),
                    event.duration_ms,
                    event.created_at
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<SyncEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM sync_events ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let mut rows = self.conn.query(&sql, [to_limit(limit)]).await?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().await? {
            events.push(Self::parse_event(&row)?);
        }
        Ok(events)
    }

    async fn last_success_at(&self) -> Result<Option<i64>> {
        self.query_optional_i64("SELECT MAX(created_at) FROM sync_events WHERE status = 'success'")
            .await
    }

    async fn delete_events_before(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_events WHERE created_at < ?", [cutoff])
            .await?;
        Ok(rows)
    }
}
