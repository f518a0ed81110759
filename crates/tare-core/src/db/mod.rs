//! Database layer for Tare

mod conflict_repository;
mod connection;
mod entity_repository;
mod migrations;
mod queue_repository;
mod settings_repository;

pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository, NewConflict};
pub use connection::Database;
pub use entity_repository::{EntityRepository, LibSqlEntityRepository, RawRecord};
pub use queue_repository::{LibSqlQueueRepository, NewSyncEvent, QueueRepository};
pub use settings_repository::{
    LibSqlMetaRepository, LibSqlSettingsRepository, MetaRepository, SettingsRepository,
};

/// Run `work` inside one transaction, rolling back if it fails.
///
/// `work` must not have been polled yet; it runs after `BEGIN`.
pub(crate) async fn in_transaction<T>(
    conn: &libsql::Connection,
    work: impl std::future::Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    conn.execute("BEGIN TRANSACTION", ()).await?;
    match work.await {
        Ok(value) => {
            conn.execute("COMMIT", ()).await?;
            Ok(value)
        }
        Err(error) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(error)
        }
    }
}
