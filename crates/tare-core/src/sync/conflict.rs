//! Conflict detection and resolution for server-pushed copies of local
//! records.
//!
//! A pair diverges when either its version counters or its content
//! fingerprints differ. The audit record is always written before the local
//! store is touched.

use serde::Serialize;

use crate::db::{ConflictRepository, LibSqlConflictRepository, NewConflict};
use crate::models::{Collection, ConflictRecord, Entity, Resolution};
use crate::services::DatabaseService;
use crate::util::{now_ms, DAY_MS};
use crate::Result;

const RECENT_CONFLICT_LIMIT: usize = 10;
const CONFLICT_RETENTION_MS: i64 = DAY_MS * 7;

/// A diverging local/server pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictInfo<T> {
    pub record_id: String,
    pub local: T,
    pub server: T,
    pub local_fingerprint: String,
    pub server_fingerprint: String,
}

impl<T: Entity> ConflictInfo<T> {
    pub fn collection(&self) -> Collection {
        T::COLLECTION
    }

    pub fn local_version(&self) -> i64 {
        self.local.version()
    }

    pub fn server_version(&self) -> i64 {
        self.server.version()
    }

    fn resolved_version(&self) -> i64 {
        self.local_version().max(self.server_version()) + 1
    }
}

#[derive(Clone)]
pub struct ConflictResolver {
    db: DatabaseService,
}

impl ConflictResolver {
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Compare server copies against local records with the same id.
    ///
    /// Records missing on either side are creations, not conflicts.
    pub async fn detect_conflicts<T: Entity>(
        &self,
        server_records: &[T],
    ) -> Result<Vec<ConflictInfo<T>>> {
        let mut conflicts = Vec::new();
        for server in server_records {
            let Some(local) = self.db.get::<T>(server.id()).await? else {
                continue;
            };

            let local_fingerprint = local.fingerprint();
            let server_fingerprint = server.fingerprint();
            if local.version() == server.version() && local_fingerprint == server_fingerprint {
                continue;
            }

            conflicts.push(ConflictInfo {
                record_id: server.id().to_string(),
                local,
                server: server.clone(),
                local_fingerprint,
                server_fingerprint,
            });
        }

        if !conflicts.is_empty() {
            tracing::info!(
                "Detected {} conflicts in {}",
                conflicts.len(),
                T::COLLECTION
            );
        }
        Ok(conflicts)
    }

    /// Settle every conflict in favour of the local copy
    pub async fn resolve_conflicts<T: Entity>(&self, conflicts: &[ConflictInfo<T>]) -> Result<usize> {
        self.resolve_conflicts_with(conflicts, Resolution::LocalWins)
            .await
    }

    /// Settle every conflict with the given policy.
    ///
    /// `LocalWins` keeps local content and `ServerWins` applies the server
    /// copy; both stamp version `max(local, server) + 1` and a fresh
    /// fingerprint. `Manual` only records the conflict.
    pub async fn resolve_conflicts_with<T: Entity>(
        &self,
        conflicts: &[ConflictInfo<T>],
        resolution: Resolution,
    ) -> Result<usize> {
        for conflict in conflicts {
            self.record(conflict, resolution).await?;

            let winner = match resolution {
                Resolution::LocalWins => Some(&conflict.local),
                Resolution::ServerWins => Some(&conflict.server),
                Resolution::Manual => None,
            };
            if let Some(winner) = winner {
                let mut resolved = winner.clone();
                let fingerprint = resolved.fingerprint();
                resolved.set_sync_meta(conflict.resolved_version(), fingerprint);
                self.db.put(&resolved).await?;
            }

            tracing::info!(
                "Resolved {} conflict on {}/{} (local v{}, server v{})",
                resolution,
                T::COLLECTION,
                conflict.record_id,
                conflict.local_version(),
                conflict.server_version()
            );
        }
        Ok(conflicts.len())
    }

    async fn record<T: Entity>(&self, conflict: &ConflictInfo<T>, resolution: Resolution) -> Result<i64> {
        let local_data = serde_json::to_value(&conflict.local)?;
        let server_data = serde_json::to_value(&conflict.server)?;

        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .insert(NewConflict {
                collection: T::COLLECTION,
                record_id: &conflict.record_id,
                local_version: conflict.local_version(),
                server_version: conflict.server_version(),
                local_data: &local_data,
                server_data: &server_data,
                resolution,
                created_at: now_ms(),
            })
            .await
    }

    /// Conflicts recorded in the last 24 hours
    pub async fn get_conflict_count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .count_since(now_ms().saturating_sub(DAY_MS))
            .await
    }

    pub async fn get_recent_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .recent(RECENT_CONFLICT_LIMIT)
            .await
    }

    pub async fn conflicts_for_record(
        &self,
        collection: Collection,
        record_id: &str,
    ) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_for_record(collection, record_id)
            .await
    }

    /// Purge conflicts older than a week
    pub async fn cleanup_old_conflicts(&self) -> Result<u64> {
        let removed = {
            let db = self.db.lock().await;
            LibSqlConflictRepository::new(db.connection())
                .delete_before(now_ms().saturating_sub(CONFLICT_RETENTION_MS))
                .await?
        };
        if removed > 0 {
            tracing::info!("Removed {removed} old conflict records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, WeighTicket};
    use pretty_assertions::assert_eq;

    async fn setup() -> (DatabaseService, ConflictResolver) {
        let db = DatabaseService::open_in_memory().await.unwrap();
        (db.clone(), ConflictResolver::new(db))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn identical_records_do_not_conflict() {
        let (db, resolver) = setup().await;
        let client = Client::new("Acme");
        db.put(&client).await.unwrap();

        let conflicts = resolver.detect_conflicts(&[client]).await.unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_only_records_are_not_conflicts() {
        let (_db, resolver) = setup().await;
        let conflicts = resolver
            .detect_conflicts(&[Client::new("Remote only")])
            .await
            .unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn version_or_content_divergence_conflicts() {
        let (db, resolver) = setup().await;
        let local = Client::new("Acme");
        db.put(&local).await.unwrap();

        let mut newer = local.clone();
        newer.version = 4;
        assert_eq!(resolver.detect_conflicts(&[newer]).await.unwrap().len(), 1);

        let mut edited = local.clone();
        edited.name = "Acme Ltd".to_string();
        let conflicts = resolver.detect_conflicts(&[edited]).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_ne!(conflicts[0].local_fingerprint, conflicts[0].server_fingerprint);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detection_is_repeatable() {
        let (db, resolver) = setup().await;
        let local = WeighTicket::new("T-1", "client", 30_000, 12_000);
        db.put(&local).await.unwrap();
        let mut server = local.clone();
        server.tare_kg = 12_500;

        let first = resolver.detect_conflicts(&[server.clone()]).await.unwrap();
        for _ in 0..5 {
            let again = resolver.detect_conflicts(&[server.clone()]).await.unwrap();
            assert_eq!(again, first);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_wins_keeps_content_and_bumps_version() {
        let (db, resolver) = setup().await;
        let mut local = Client::new("Acme");
        local.version = 3;
        db.put(&local).await.unwrap();

        let mut server = local.clone();
        server.name = "Acme (server)".to_string();
        server.version = 5;

        let conflicts = resolver.detect_conflicts(&[server]).await.unwrap();
        assert_eq!(resolver.resolve_conflicts(&conflicts).await.unwrap(), 1);

        let stored: Client = db.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 6);
        assert_eq!(stored.sync_hash.as_deref(), Some(local.fingerprint().as_str()));

        let mut content_only = stored.clone();
        content_only.version = local.version;
        content_only.sync_hash = local.sync_hash.clone();
        assert_eq!(content_only, local);

        let records = resolver.get_recent_conflicts().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resolution, Resolution::LocalWins);
        assert_eq!(records[0].record_id, local.id);
        assert_eq!(records[0].local_version, 3);
        assert_eq!(records[0].server_version, 5);
        assert_eq!(resolver.get_conflict_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolved_record_no_longer_conflicts_with_itself() {
        let (db, resolver) = setup().await;
        let local = Client::new("Acme");
        db.put(&local).await.unwrap();
        let mut server = local.clone();
        server.version = 2;

        let conflicts = resolver.detect_conflicts(&[server]).await.unwrap();
        resolver.resolve_conflicts(&conflicts).await.unwrap();

        let stored: Client = db.get(&local.id).await.unwrap().unwrap();
        assert!(resolver.detect_conflicts(&[stored]).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_wins_applies_server_content() {
        let (db, resolver) = setup().await;
        let local = Client::new("Acme");
        db.put(&local).await.unwrap();
        let mut server = local.clone();
        server.name = "Acme Holdings".to_string();

        let conflicts = resolver.detect_conflicts(&[server]).await.unwrap();
        resolver
            .resolve_conflicts_with(&conflicts, Resolution::ServerWins)
            .await
            .unwrap();

        let stored: Client = db.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Acme Holdings");
        assert_eq!(stored.version, 2);
        let history = resolver
            .conflicts_for_record(Collection::Clients, &local.id)
            .await
            .unwrap();
        assert_eq!(history[0].resolution, Resolution::ServerWins);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_only_records_the_conflict() {
        let (db, resolver) = setup().await;
        let local = Client::new("Acme");
        db.put(&local).await.unwrap();
        let mut server = local.clone();
        server.email = Some("ops@acme.test".to_string());

        let conflicts = resolver.detect_conflicts(&[server]).await.unwrap();
        resolver
            .resolve_conflicts_with(&conflicts, Resolution::Manual)
            .await
            .unwrap();

        let stored: Client = db.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored, local);
        assert_eq!(resolver.get_conflict_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_keeps_recent_conflicts() {
        let (db, resolver) = setup().await;
        let local = Client::new("Acme");
        db.put(&local).await.unwrap();
        let mut server = local.clone();
        server.version = 9;
        let conflicts = resolver.detect_conflicts(&[server]).await.unwrap();
        resolver.resolve_conflicts(&conflicts).await.unwrap();

        assert_eq!(resolver.cleanup_old_conflicts().await.unwrap(), 0);
        assert_eq!(resolver.get_recent_conflicts().await.unwrap().len(), 1);
    }
}
