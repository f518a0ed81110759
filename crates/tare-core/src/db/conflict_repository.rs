//! Conflict audit log storage

use libsql::{Connection, Row};

use crate::error::{Error, Result};
use crate::models::{Collection, ConflictRecord, Resolution};

/// A conflict about to be recorded
#[derive(Debug, Clone)]
pub struct NewConflict<'a> {
    pub collection: Collection,
    pub record_id: &'a str,
    pub local_version: i64,
    pub server_version: i64,
    pub local_data: &'a serde_json::Value,
    pub server_data: &'a serde_json::Value,
    pub resolution: Resolution,
    pub created_at: i64,
}

/// Trait for conflict log operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Append a conflict record
    async fn insert(&self, conflict: NewConflict<'_>) -> Result<i64>;

    /// Number of conflicts recorded at or after `since`
    async fn count_since(&self, since: i64) -> Result<u64>;

    /// Most recent conflicts, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<ConflictRecord>>;

    /// Conflicts recorded for one record, newest first
    async fn list_for_record(&self, collection: Collection, record_id: &str)
        -> Result<Vec<ConflictRecord>>;

    /// Delete conflicts recorded before `cutoff`
    async fn delete_before(&self, cutoff: i64) -> Result<u64>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<ConflictRecord> {
        let collection: String = row.get(1)?;
        let local_data: String = row.get(5)?;
        let server_data: String = row.get(6)?;
        let resolution: String = row.get(7)?;

        Ok(ConflictRecord {
            id: row.get(0)?,
            collection: collection.parse().map_err(Error::Database)?,
            record_id: row.get(2)?,
            local_version: row.get(3)?,
            server_version: row.get(4)?,
            local_data: serde_json::from_str(&local_data)?,
            server_data: serde_json::from_str(&server_data)?,
            resolution: Resolution::parse(&resolution)
                .ok_or_else(|| Error::Database(format!("invalid resolution: {resolution}")))?,
            created_at: row.get(8)?,
        })
    }

    async fn collect(&self, mut rows: libsql::Rows) -> Result<Vec<ConflictRecord>> {
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn insert(&self, conflict: NewConflict<'_>) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    collection, record_id, local_version, server_version,
                    local_data, server_data, resolution, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                libsql::params![
                    conflict.collection.as_str(),
                    conflict.record_id,
                    conflict.local_version,
                    conflict.server_version,
                    serde_json::to_string(conflict.local_data)?,
                    serde_json::to_string(conflict.server_data)?,
                    conflict.resolution.as_str(),
                    conflict.created_at
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    async fn count_since(&self, since: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM sync_conflicts WHERE created_at >= ?",
                [since],
            )
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let rows = self
            .conn
            .query(
                "SELECT id, collection, record_id, local_version, server_version,
                        local_data, server_data, resolution, created_at
                 FROM sync_conflicts
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?",
                [i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;
        self.collect(rows).await
    }

    async fn list_for_record(
        &self,
        collection: Collection,
        record_id: &str,
    ) -> Result<Vec<ConflictRecord>> {
        let rows = self
            .conn
            .query(
                "SELECT id, collection, record_id, local_version, server_version,
                        local_data, server_data, resolution, created_at
                 FROM sync_conflicts
                 WHERE collection = ? AND record_id = ?
                 ORDER BY created_at DESC, id DESC",
                [collection.as_str(), record_id],
            )
            .await?;
        self.collect(rows).await
    }

    async fn delete_before(&self, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_conflicts WHERE created_at < ?", [cutoff])
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_query_conflicts() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());
        let local = json!({ "id": "t1", "gross_kg": 100 });
        let server = json!({ "id": "t1", "gross_kg": 120 });

        for at in [1_000, 5_000] {
            repo.insert(NewConflict {
                collection: Collection::WeighTickets,
                record_id: "t1",
                local_version: 3,
                server_version: 2,
                local_data: &local,
                server_data: &server,
                resolution: Resolution::LocalWins,
                created_at: at,
            })
            .await
            .unwrap();
        }

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].created_at, 5_000);
        assert_eq!(recent[0].server_data, server);
        assert_eq!(recent[0].resolution, Resolution::LocalWins);

        assert_eq!(repo.count_since(2_000).await.unwrap(), 1);
        assert_eq!(
            repo.list_for_record(Collection::WeighTickets, "t1")
                .await
                .unwrap()
                .len(),
            2
        );

        assert_eq!(repo.delete_before(2_000).await.unwrap(), 1);
        assert_eq!(repo.recent(10).await.unwrap().len(), 1);
    }
}
