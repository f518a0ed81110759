//! Shared database service wrapper used across clients.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::db::{
    Database, EntityRepository, LibSqlEntityRepository, LibSqlMetaRepository,
    LibSqlSettingsRepository, MetaRepository, RawRecord, SettingsRepository,
};
use crate::models::{Collection, Entity, Settings};
use crate::{Error, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A mutation of backed-up data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A record of the collection was written or deleted
    Entity(Collection),
    /// Settings were saved
    Settings,
    /// Every collection was replaced from a backup
    Restored,
}

/// Thread-safe service for DB and repository operations.
///
/// Cloning is cheap; all clones share one connection and one change channel.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    changes: broadcast::Sender<Change>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh store is
    /// created, so a restore can be offered instead of failing to start.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::from_database(db, None))
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            changes,
        }
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "tare.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local DB file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };

        for suffix in ["-wal", "-shm"] {
            let sidecar = parent.join(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale database file {}", sidecar.display());
            }
        }

        Ok(())
    }

    /// Filesystem path of the database, `None` when in memory
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Subscribe to mutation notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    fn notify(&self, change: Change) {
        // No subscriber is not an error
        let _ = self.changes.send(change);
    }

    /// Lock the connection for repository access
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlEntityRepository::new(db.connection());
        repo.count(collection).await
    }

    /// Whether any of the given collections holds at least one record.
    pub async fn has_records_in(&self, collections: &[Collection]) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlEntityRepository::new(db.connection());
        for collection in collections {
            if repo.count(*collection).await? > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fetch a record by id.
    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlEntityRepository::new(db.connection());
        repo.get(id).await
    }

    /// List every record of a collection.
    pub async fn list<T: Entity>(&self) -> Result<Vec<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlEntityRepository::new(db.connection());
        repo.list().await
    }

    /// Insert or replace a record.
    pub async fn put<T: Entity>(&self, record: &T) -> Result<()> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlEntityRepository::new(db.connection());
            repo.put(record).await?;
        }
        self.notify(Change::Entity(T::COLLECTION));
        Ok(())
    }

    /// Apply `edit` to the stored record and write it back under one lock.
    ///
    /// Returns the updated record, or `None` if it no longer exists.
    pub async fn update<T: Entity>(&self, id: &str, edit: impl FnOnce(&mut T)) -> Result<Option<T>> {
        let updated = {
            let db = self.db.lock().await;
            let repo = LibSqlEntityRepository::new(db.connection());
            let Some(mut record) = repo.get::<T>(id).await? else {
                return Ok(None);
            };
            edit(&mut record);
            repo.put(&record).await?;
            record
        };
        self.notify(Change::Entity(T::COLLECTION));
        Ok(Some(updated))
    }

    /// Insert or replace several records in one transaction.
    pub async fn put_many<T: Entity>(&self, records: &[T]) -> Result<()> {
        {
            let db = self.db.lock().await;
            let conn = db.connection();
            let repo = LibSqlEntityRepository::new(conn);

            conn.execute("BEGIN TRANSACTION", ()).await?;
            let outcome = async {
                for record in records {
                    repo.put(record).await?;
                }
                Ok::<_, Error>(())
            }
            .await;

            if let Err(error) = outcome {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
            conn.execute("COMMIT", ()).await?;
        }
        self.notify(Change::Entity(T::COLLECTION));
        Ok(())
    }

    /// Delete a record, returning whether it existed.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let deleted = {
            let db = self.db.lock().await;
            let repo = LibSqlEntityRepository::new(db.connection());
            repo.delete(collection, id).await?
        };
        if deleted {
            self.notify(Change::Entity(collection));
        }
        Ok(deleted)
    }

    /// Load settings.
    pub async fn load_settings(&self) -> Result<Settings> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.load().await
    }

    /// Save settings.
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlSettingsRepository::new(db.connection());
            repo.save(settings).await?;
        }
        self.notify(Change::Settings);
        Ok(())
    }

    /// Read every collection and the settings under a single lock.
    pub async fn export_all(&self) -> Result<(BTreeMap<Collection, Vec<Value>>, Settings)> {
        let db = self.db.lock().await;
        let entities = LibSqlEntityRepository::new(db.connection());

        let mut collections = BTreeMap::new();
        for collection in Collection::ALL {
            collections.insert(collection, entities.list_raw(collection).await?);
        }
        let settings = LibSqlSettingsRepository::new(db.connection()).load().await?;
        Ok((collections, settings))
    }

    /// Replace every collection and the settings atomically.
    ///
    /// Collections absent from `collections` are emptied. Either all of it is
    /// applied or none of it is.
    pub async fn replace_all(
        &self,
        collections: &BTreeMap<Collection, Vec<Value>>,
        settings: &Settings,
    ) -> Result<()> {
        // Validate before touching the store
        let mut prepared = Vec::with_capacity(collections.len());
        for (collection, records) in collections {
            for record in records {
                collection.check_record(record).map_err(|error| {
                    Error::InvalidInput(format!("malformed record in {collection}: {error}"))
                })?;
            }
            let records = records
                .iter()
                .cloned()
                .map(RawRecord::from_value)
                .collect::<Result<Vec<_>>>()?;
            prepared.push((*collection, records));
        }

        {
            let db = self.db.lock().await;
            let conn = db.connection();
            let entities = LibSqlEntityRepository::new(conn);
            let settings_repo = LibSqlSettingsRepository::new(conn);

            conn.execute("BEGIN TRANSACTION", ()).await?;
            let outcome = async {
                for collection in Collection::ALL {
                    entities.clear(collection).await?;
                }
                for (collection, records) in &prepared {
                    for record in records {
                        entities.put_raw(*collection, record).await?;
                    }
                }
                settings_repo.save(settings).await?;
                Ok::<_, Error>(())
            }
            .await;

            if let Err(error) = outcome {
                conn.execute("ROLLBACK", ()).await.ok();
                tracing::error!("Replacing local data failed, rolled back: {error}");
                return Err(error);
            }
            conn.execute("COMMIT", ()).await?;
        }

        self.notify(Change::Restored);
        Ok(())
    }

    /// Read a local-only flag.
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection()).get(key).await
    }

    /// Write a local-only flag.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .set(key, value)
            .await
    }

    /// Remove a local-only flag.
    pub async fn remove_meta(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection()).remove(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, Product, WeighTicket};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_put_and_list_roundtrip() {
        let service = DatabaseService::open_in_memory().await.unwrap();

        let client = Client::new("Acme");
        service.put(&client).await.unwrap();
        let clients: Vec<Client> = service.list().await.unwrap();
        assert_eq!(clients, vec![client]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_are_broadcast() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let mut changes = service.subscribe_changes();

        service.put(&Product::new("Sand", 900)).await.unwrap();
        service.save_settings(&Settings::default()).await.unwrap();

        assert_eq!(
            changes.recv().await.unwrap(),
            Change::Entity(Collection::Products)
        );
        assert_eq!(changes.recv().await.unwrap(), Change::Settings);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_edits_the_stored_record() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let ticket = WeighTicket::new("T-1", "c1", 20_000, 9_000);
        service.put(&ticket).await.unwrap();

        let mut stored = ticket.clone();
        stored.tare_kg = 8_000;
        service.put(&stored).await.unwrap();

        let updated = service
            .update::<WeighTicket>(&ticket.id, |t| t.notes = Some("checked".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.tare_kg, 8_000);
        assert_eq!(updated.notes.as_deref(), Some("checked"));

        assert!(service
            .update::<WeighTicket>("missing", |t| t.tare_kg = 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn has_records_in_checks_each_collection() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        assert!(!service.has_records_in(&Collection::CORE).await.unwrap());

        service
            .put(&WeighTicket::new("T-1", "c1", 20_000, 9_000))
            .await
            .unwrap();
        assert!(service.has_records_in(&Collection::CORE).await.unwrap());
        assert!(!service
            .has_records_in(&[Collection::Carriers])
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replace_all_is_all_or_nothing() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        let existing = Client::new("Existing");
        service.put(&existing).await.unwrap();

        let mut bad = BTreeMap::new();
        bad.insert(
            Collection::Clients,
            vec![json!({ "id": "ok", "name": "A" }), json!({ "name": "no id" })],
        );
        assert!(service
            .replace_all(&bad, &Settings::default())
            .await
            .is_err());

        let clients: Vec<Client> = service.list().await.unwrap();
        assert_eq!(clients, vec![existing]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_then_replace_restores_everything() {
        let source = DatabaseService::open_in_memory().await.unwrap();
        source.put(&Client::new("Acme")).await.unwrap();
        source.put(&Product::new("Gravel", 1_200)).await.unwrap();
        let settings = Settings {
            company_name: "Quarry".to_string(),
            ..Settings::default()
        };
        source.save_settings(&settings).await.unwrap();

        let (collections, exported_settings) = source.export_all().await.unwrap();

        let target = DatabaseService::open_in_memory().await.unwrap();
        target
            .replace_all(&collections, &exported_settings)
            .await
            .unwrap();

        let (restored, restored_settings) = target.export_all().await.unwrap();
        assert_eq!(restored, collections);
        assert_eq!(restored_settings, settings);
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tare.db");
        let wal_path = dir.path().join("tare.db-wal");

        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();

        DatabaseService::quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        let moved = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("tare.db.corrupt-")
            });
        assert!(moved);
    }
}
