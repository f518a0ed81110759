//! Durable storage tiers, in fallback order.
//!
//! Every tier exposes the same capability: probe, save a snapshot, load the
//! latest snapshot. The engine only ever sees `dyn BackupTier`.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{BackupError, BackupErrorKind, BackupResult};
use super::snapshot::BackupSnapshot;

pub const BACKUP_FILE_NAME: &str = "tare-backup.json";
pub const EMERGENCY_FILE_NAME: &str = "tare-emergency.json";
pub const STRUCTURED_STORE_FILE_NAME: &str = "tare-backups.db";
const STRUCTURED_STORE_KEEP: i64 = 3;
const EMERGENCY_TICKET_LIMIT: usize = 200;
const PROBE_FILE_NAME: &str = ".tare-probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// App-private data directory
    AppData,
    /// Location the operator picked
    UserFile,
    /// Separate libSQL database keeping the last few snapshots
    StructuredStore,
    /// Minimal snapshot of last resort
    Emergency,
}

impl TierKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppData => "app_data",
            Self::UserFile => "user_file",
            Self::StructuredStore => "structured_store",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait BackupTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// One-time capability probe
    async fn is_available(&self) -> bool;

    async fn save(&self, snapshot: &BackupSnapshot) -> BackupResult<()>;

    /// Latest stored snapshot, if any
    async fn load(&self) -> BackupResult<Option<BackupSnapshot>>;

    /// Where the artifact lives on disk
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Write to a sibling temp file, then rename over the target
pub async fn write_atomic(path: &Path, contents: &[u8]) -> BackupResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    if let Err(error) = tokio::fs::write(&tmp, contents).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(error.into());
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn probe_dir(dir: &Path) -> bool {
    if tokio::fs::create_dir_all(dir).await.is_err() {
        return false;
    }
    let probe = dir.join(PROBE_FILE_NAME);
    let writable = tokio::fs::write(&probe, b"ok").await.is_ok();
    tokio::fs::remove_file(&probe).await.ok();
    writable
}

async fn load_file(path: &Path) -> BackupResult<Option<BackupSnapshot>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => BackupSnapshot::parse(&raw).map(Some),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn save_file(path: &Path, snapshot: &BackupSnapshot) -> BackupResult<()> {
    write_atomic(path, snapshot.to_json()?.as_bytes()).await
}

/// `<dir>/tare-backup.json`
#[derive(Debug, Clone)]
pub struct AppDataTier {
    path: PathBuf,
}

impl AppDataTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(BACKUP_FILE_NAME),
        }
    }
}

#[async_trait]
impl BackupTier for AppDataTier {
    fn kind(&self) -> TierKind {
        TierKind::AppData
    }

    async fn is_available(&self) -> bool {
        match self.path.parent() {
            Some(dir) => probe_dir(dir).await,
            None => false,
        }
    }

    async fn save(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        save_file(&self.path, snapshot).await
    }

    async fn load(&self) -> BackupResult<Option<BackupSnapshot>> {
        load_file(&self.path).await
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// File the operator chose; unavailable until one is configured
#[derive(Debug, Clone, Default)]
pub struct UserFileTier {
    path: Option<PathBuf>,
}

impl UserFileTier {
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl BackupTier for UserFileTier {
    fn kind(&self) -> TierKind {
        TierKind::UserFile
    }

    async fn is_available(&self) -> bool {
        // The parent must already exist; the grant is for that location only
        match self.path.as_deref().and_then(Path::parent) {
            Some(dir) if dir.is_dir() => probe_dir(dir).await,
            _ => false,
        }
    }

    async fn save(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| BackupError::new(BackupErrorKind::Permission, "no backup file chosen"))?;
        save_file(path, snapshot).await
    }

    async fn load(&self) -> BackupResult<Option<BackupSnapshot>> {
        match self.path.as_deref() {
            Some(path) => load_file(path).await,
            None => Ok(None),
        }
    }

    fn location(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Separate libSQL database holding the last few snapshots
#[derive(Debug, Clone)]
pub struct StructuredStoreTier {
    path: PathBuf,
}

impl StructuredStoreTier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn connect(&self) -> BackupResult<(libsql::Database, libsql::Connection)> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = libsql::Builder::new_local(&self.path).build().await?;
        let conn = db.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS backup_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                generated_at INTEGER NOT NULL,
                minimal INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            )",
            (),
        )
        .await?;
        Ok((db, conn))
    }

    /// Number of snapshots currently kept
    pub async fn snapshot_count(&self) -> BackupResult<u64> {
        let (_db, conn) = self.connect().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM backup_snapshots", ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl BackupTier for StructuredStoreTier {
    fn kind(&self) -> TierKind {
        TierKind::StructuredStore
    }

    async fn is_available(&self) -> bool {
        self.connect().await.is_ok()
    }

    async fn save(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        let body = snapshot.to_json()?;
        let (_db, conn) = self.connect().await?;

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = async {
            conn.execute(
                "INSERT INTO backup_snapshots (generated_at, minimal, body) VALUES (?1, ?2, ?3)",
                libsql::params![snapshot.generated_at, i64::from(snapshot.minimal), body],
            )
            .await?;
            conn.execute(
                "DELETE FROM backup_snapshots WHERE id NOT IN (
                    SELECT id FROM backup_snapshots ORDER BY id DESC LIMIT ?1
                 )",
                [STRUCTURED_STORE_KEEP],
            )
            .await?;
            Ok::<_, BackupError>(())
        }
        .await;

        if let Err(error) = outcome {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error);
        }
        conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    async fn load(&self) -> BackupResult<Option<BackupSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let (_db, conn) = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT body FROM backup_snapshots ORDER BY id DESC LIMIT 1",
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => BackupSnapshot::parse(&row.get::<String>(0)?).map(Some),
            None => Ok(None),
        }
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Minimal snapshot written when every richer tier has failed
#[derive(Debug, Clone)]
pub struct EmergencyTier {
    path: PathBuf,
}

impl EmergencyTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(EMERGENCY_FILE_NAME),
        }
    }
}

#[async_trait]
impl BackupTier for EmergencyTier {
    fn kind(&self) -> TierKind {
        TierKind::Emergency
    }

    async fn is_available(&self) -> bool {
        match self.path.parent() {
            Some(dir) => probe_dir(dir).await,
            None => false,
        }
    }

    async fn save(&self, snapshot: &BackupSnapshot) -> BackupResult<()> {
        let minimal = snapshot.to_minimal(EMERGENCY_TICKET_LIMIT)?;
        save_file(&self.path, &minimal).await
    }

    async fn load(&self) -> BackupResult<Option<BackupSnapshot>> {
        load_file(&self.path).await
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, Settings, Template, TemplateKind, WeighTicket};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn snapshot_with_tickets(count: i64) -> BackupSnapshot {
        let tickets = (0..count)
            .map(|n| {
                let mut ticket = WeighTicket::new(format!("T-{n}"), "client", 10_000, 4_000);
                ticket.created_at = n;
                serde_json::to_value(ticket).unwrap()
            })
            .collect();
        let template = Template::new("Default", TemplateKind::Ticket, "{{number}}");
        let collections = BTreeMap::from([
            (Collection::WeighTickets, tickets),
            (
                Collection::Templates,
                vec![serde_json::to_value(template).unwrap()],
            ),
        ]);
        BackupSnapshot::new(collections, Settings::default()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn app_data_tier_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = AppDataTier::new(dir.path().join("backups"));
        assert!(tier.is_available().await);
        assert_eq!(tier.load().await.unwrap(), None);

        let snapshot = snapshot_with_tickets(3);
        tier.save(&snapshot).await.unwrap();
        assert_eq!(tier.load().await.unwrap(), Some(snapshot));
        assert!(!dir.path().join("backups").join(PROBE_FILE_NAME).exists());
        assert!(!dir.path().join("backups").join("tare-backup.json.tmp").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn user_file_tier_requires_a_path() {
        let tier = UserFileTier::new(None);
        assert!(!tier.is_available().await);
        let error = tier.save(&snapshot_with_tickets(1)).await.unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Permission);

        let dir = tempdir().unwrap();
        let missing_parent = UserFileTier::new(Some(dir.path().join("nope").join("b.json")));
        assert!(!missing_parent.is_available().await);

        let chosen = UserFileTier::new(Some(dir.path().join("tare-backup.json")));
        assert!(chosen.is_available().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupted_file_load_is_corruption() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(BACKUP_FILE_NAME), "{ truncated").unwrap();
        let tier = AppDataTier::new(dir.path());

        let error = tier.load().await.unwrap_err();
        assert_eq!(error.kind, BackupErrorKind::Corruption);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn structured_store_keeps_last_three() {
        let dir = tempdir().unwrap();
        let tier = StructuredStoreTier::new(dir.path().join(STRUCTURED_STORE_FILE_NAME));
        assert!(tier.is_available().await);

        let mut last = None;
        for n in 1..=5 {
            let snapshot = snapshot_with_tickets(n);
            tier.save(&snapshot).await.unwrap();
            last = Some(snapshot);
        }

        assert_eq!(tier.snapshot_count().await.unwrap(), 3);
        assert_eq!(tier.load().await.unwrap(), last);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emergency_tier_stores_minimal_snapshot() {
        let dir = tempdir().unwrap();
        let tier = EmergencyTier::new(dir.path());
        tier.save(&snapshot_with_tickets(250)).await.unwrap();

        let stored = tier.load().await.unwrap().unwrap();
        assert!(stored.minimal);
        assert_eq!(stored.count(Collection::WeighTickets), EMERGENCY_TICKET_LIMIT);
        assert_eq!(stored.count(Collection::Templates), 0);
    }
}
