//! Business-entity repository
//!
//! Every collection shares one `entities` table. Records are stored as full
//! JSON documents so the backup engine can enumerate and replace collections
//! without knowing their shape.

use libsql::Connection;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Collection, Entity};
use crate::util::now_ms;

/// An untyped record as held in the store
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub version: i64,
    pub data: Value,
}

impl RawRecord {
    /// Extract id and version from a JSON document
    pub fn from_value(data: Value) -> Result<Self> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("record is missing a string `id`".into()))?
            .to_string();
        let version = data.get("version").and_then(Value::as_i64).unwrap_or(0);
        Ok(Self { id, version, data })
    }
}

/// Trait for collection-style storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Number of records in a collection
    async fn count(&self, collection: Collection) -> Result<u64>;

    /// Get a typed record by id
    async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>>;

    /// List every typed record of a collection, oldest id first
    async fn list<T: Entity>(&self) -> Result<Vec<T>>;

    /// Insert or replace a typed record
    async fn put<T: Entity>(&self, record: &T) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, collection: Collection, id: &str) -> Result<bool>;

    /// List raw JSON documents of a collection
    async fn list_raw(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Insert or replace a raw JSON document
    async fn put_raw(&self, collection: Collection, record: &RawRecord) -> Result<()>;

    /// Remove every record of a collection
    async fn clear(&self, collection: Collection) -> Result<u64>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
        data: String,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO entities (collection, id, version, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(collection, id) DO UPDATE SET
                     version = excluded.version,
                     data = excluded.data,
                     updated_at = excluded.updated_at",
                libsql::params![collection.as_str(), id, version, data, now_ms()],
            )
            .await?;
        Ok(())
    }

    async fn query_documents(&self, collection: Collection) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE collection = ? ORDER BY id ASC",
                [collection.as_str()],
            )
            .await?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            documents.push(row.get::<String>(0)?);
        }
        Ok(documents)
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn count(&self, collection: Collection) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM entities WHERE collection = ?",
                [collection.as_str()],
            )
            .await?;

        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE collection = ? AND id = ?",
                [T::COLLECTION.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn list<T: Entity>(&self) -> Result<Vec<T>> {
        self.query_documents(T::COLLECTION)
            .await?
            .iter()
            .map(|data| serde_json::from_str(data).map_err(Error::from))
            .collect()
    }

    async fn put<T: Entity>(&self, record: &T) -> Result<()> {
        let data = serde_json::to_string(record)?;
        self.upsert(T::COLLECTION, record.id(), record.version(), data)
            .await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM entities WHERE collection = ? AND id = ?",
                [collection.as_str(), id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn list_raw(&self, collection: Collection) -> Result<Vec<Value>> {
        self.query_documents(collection)
            .await?
            .iter()
            .map(|data| serde_json::from_str(data).map_err(Error::from))
            .collect()
    }

    async fn put_raw(&self, collection: Collection, record: &RawRecord) -> Result<()> {
        let data = serde_json::to_string(&record.data)?;
        self.upsert(collection, &record.id, record.version, data)
            .await
    }

    async fn clear(&self, collection: Collection) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM entities WHERE collection = ?",
                [collection.as_str()],
            )
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Client, Product};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let client = Client::new("Acme Quarries");
        repo.put(&client).await.unwrap();

        let fetched: Client = repo.get(&client.id).await.unwrap().unwrap();
        assert_eq!(fetched, client);
        assert!(repo.get::<Product>(&client.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_replaces_existing() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut client = Client::new("Acme");
        repo.put(&client).await.unwrap();
        client.name = "Acme Ltd".to_string();
        repo.put(&client).await.unwrap();

        assert_eq!(repo.count(Collection::Clients).await.unwrap(), 1);
        let fetched: Client = repo.get(&client.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Acme Ltd");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counts_are_per_collection() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        repo.put(&Client::new("A")).await.unwrap();
        repo.put(&Client::new("B")).await.unwrap();
        repo.put(&Product::new("Sand", 900)).await.unwrap();

        assert_eq!(repo.count(Collection::Clients).await.unwrap(), 2);
        assert_eq!(repo.count(Collection::Products).await.unwrap(), 1);
        assert_eq!(repo.count(Collection::WeighTickets).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_and_clear() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let client = Client::new("A");
        repo.put(&client).await.unwrap();
        repo.put(&Client::new("B")).await.unwrap();

        assert!(repo.delete(Collection::Clients, &client.id).await.unwrap());
        assert!(!repo.delete(Collection::Clients, &client.id).await.unwrap());
        assert_eq!(repo.clear(Collection::Clients).await.unwrap(), 1);
        assert_eq!(repo.count(Collection::Clients).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_raw_roundtrip_matches_typed() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let product = Product::new("Topsoil", 2_100);
        let raw = RawRecord::from_value(serde_json::to_value(&product).unwrap()).unwrap();
        repo.put_raw(Collection::Products, &raw).await.unwrap();

        let listed: Vec<Product> = repo.list().await.unwrap();
        assert_eq!(listed, vec![product]);
    }

    #[test]
    fn test_raw_record_requires_id() {
        assert!(RawRecord::from_value(serde_json::json!({ "name": "x" })).is_err());
        let raw = RawRecord::from_value(serde_json::json!({ "id": "a", "version": 4 })).unwrap();
        assert_eq!(raw.version, 4);
    }
}
