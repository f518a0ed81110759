//! Backup/restore engine.
//!
//! Tiers are probed once by [`BackupEngine::initialize`]. Every save walks the
//! available tiers in priority order and stops at the first that persists the
//! snapshot; every per-tier failure is published on the state channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::TareConfig;
use crate::services::DatabaseService;
use crate::Result;

use super::discovery::{self, BackupCandidate};
use super::error::{BackupError, BackupErrorKind};
use super::snapshot::BackupSnapshot;
use super::tier::{
    AppDataTier, BackupTier, EmergencyTier, StructuredStoreTier, TierKind, UserFileTier,
    STRUCTURED_STORE_FILE_NAME,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierFailure {
    pub tier: TierKind,
    pub error: BackupError,
}

/// Progress of the current backup cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackupState {
    Idle,
    Serializing { tier: TierKind },
    TierFailed { tier: TierKind, error: BackupError },
    Persisted { tier: TierKind, at: i64 },
    FailedAll { errors: Vec<TierFailure> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub generated_at: i64,
    pub records: usize,
    pub minimal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStatus {
    pub kind: TierKind,
    pub available: bool,
    pub location: Option<PathBuf>,
}

#[derive(Clone)]
pub struct BackupEngine {
    db: DatabaseService,
    tiers: Arc<Vec<Arc<dyn BackupTier>>>,
    /// Result of the capability probe; `None` until initialised
    available: Arc<RwLock<Option<Vec<Arc<dyn BackupTier>>>>>,
    in_flight: Arc<Mutex<()>>,
    state: Arc<watch::Sender<BackupState>>,
    discovery_dirs: Arc<Vec<PathBuf>>,
}

impl BackupEngine {
    /// `tiers` must be in priority order
    pub fn new(db: DatabaseService, tiers: Vec<Arc<dyn BackupTier>>) -> Self {
        let (state, _) = watch::channel(BackupState::Idle);
        Self {
            db,
            tiers: Arc::new(tiers),
            available: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(Mutex::new(())),
            state: Arc::new(state),
            discovery_dirs: Arc::new(Vec::new()),
        }
    }

    /// The standard tier chain for a configuration
    pub fn from_config(db: DatabaseService, config: &TareConfig) -> Self {
        let backup_dir = config.backup_directory();
        let emergency_dir = backup_dir
            .parent()
            .map_or_else(|| backup_dir.join("emergency"), Path::to_path_buf);

        let tiers: Vec<Arc<dyn BackupTier>> = vec![
            Arc::new(AppDataTier::new(backup_dir.clone())),
            Arc::new(UserFileTier::new(config.backup.user_file.clone())),
            Arc::new(StructuredStoreTier::new(
                backup_dir.join(STRUCTURED_STORE_FILE_NAME),
            )),
            Arc::new(EmergencyTier::new(emergency_dir)),
        ];
        Self::new(db, tiers).with_discovery_dirs(config.discovery_dirs())
    }

    #[must_use]
    pub fn with_discovery_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.discovery_dirs = Arc::new(dirs);
        self
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.db
    }

    pub fn subscribe_state(&self) -> watch::Receiver<BackupState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> BackupState {
        self.state.borrow().clone()
    }

    /// Probe every tier once and remember the available ones
    pub async fn initialize(&self) -> Vec<TierKind> {
        let mut available = Vec::new();
        for tier in self.tiers.iter() {
            if tier.is_available().await {
                available.push(Arc::clone(tier));
            } else {
                tracing::debug!("Backup tier {} unavailable", tier.kind());
            }
        }

        let kinds: Vec<TierKind> = available.iter().map(|tier| tier.kind()).collect();
        match kinds.first() {
            Some(active) => tracing::info!("Backup tiers available: {kinds:?}, active {active}"),
            None => tracing::warn!("No backup tier is available"),
        }
        *self.available.write().await = Some(available);
        kinds
    }

    async fn available_tiers(&self) -> Vec<Arc<dyn BackupTier>> {
        if let Some(available) = self.available.read().await.as_ref() {
            return available.clone();
        }
        self.initialize().await;
        self.available.read().await.clone().unwrap_or_default()
    }

    pub async fn active_tier(&self) -> Option<TierKind> {
        self.available_tiers()
            .await
            .first()
            .map(|tier| tier.kind())
    }

    /// Back up now unless a backup is already running.
    ///
    /// Returns the tier that persisted the snapshot, or `None` when skipped.
    pub async fn save_now(&self) -> Result<Option<TierKind>> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Backup already in flight, skipping");
            return Ok(None);
        };
        self.capture_and_persist().await.map(Some)
    }

    /// Back up now, waiting for any running backup to finish first
    pub async fn force_save(&self) -> Result<TierKind> {
        let _guard = self.in_flight.lock().await;
        self.capture_and_persist().await
    }

    async fn capture_and_persist(&self) -> Result<TierKind> {
        let snapshot = BackupSnapshot::capture(&self.db).await?;
        self.persist(&snapshot).await
    }

    async fn persist(&self, snapshot: &BackupSnapshot) -> Result<TierKind> {
        let tiers = self.available_tiers().await;
        let mut errors = Vec::new();

        for tier in tiers {
            let kind = tier.kind();
            self.state.send_replace(BackupState::Serializing { tier: kind });
            match tier.save(snapshot).await {
                Ok(()) => {
                    self.state.send_replace(BackupState::Persisted {
                        tier: kind,
                        at: snapshot.generated_at,
                    });
                    tracing::info!(
                        "Backed up {} records to {kind}",
                        snapshot.record_count()
                    );
                    return Ok(kind);
                }
                Err(error) => {
                    tracing::warn!("Backup to {kind} failed, falling back: {error}");
                    self.state.send_replace(BackupState::TierFailed {
                        tier: kind,
                        error: error.clone(),
                    });
                    errors.push(TierFailure { tier: kind, error });
                }
            }
        }

        let kind = errors
            .first()
            .map_or(BackupErrorKind::Other, |failure| failure.error.kind);
        let summary = if errors.is_empty() {
            "no backup tier is available".to_string()
        } else {
            errors
                .iter()
                .map(|failure| format!("{}: {}", failure.tier, failure.error.message))
                .collect::<Vec<_>>()
                .join("; ")
        };
        tracing::error!("Backup failed on every tier: {summary}");
        self.state.send_replace(BackupState::FailedAll { errors });
        Err(BackupError::new(kind, format!("all backup tiers failed ({summary})")).into())
    }

    /// Parse a backup file and replace all local data with it
    pub async fn restore_from_file(&self, path: &Path) -> Result<RestoreSummary> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(BackupError::from)?;
        let snapshot = BackupSnapshot::parse(&raw).inspect_err(|error| {
            tracing::warn!("Refusing to restore {}: {error}", path.display());
        })?;
        self.restore_from_snapshot(&snapshot).await
    }

    /// Replace all local data with a snapshot, all or nothing
    pub async fn restore_from_snapshot(&self, snapshot: &BackupSnapshot) -> Result<RestoreSummary> {
        snapshot.validate()?;
        if snapshot.minimal {
            tracing::warn!("Restoring a minimal emergency snapshot; templates and older tickets are absent");
        }
        self.db
            .replace_all(&snapshot.collections, &snapshot.settings)
            .await?;

        let summary = RestoreSummary {
            generated_at: snapshot.generated_at,
            records: snapshot.record_count(),
            minimal: snapshot.minimal,
        };
        tracing::info!("Restored {} records", summary.records);
        Ok(summary)
    }

    /// Newest snapshot readable from the tiers, in priority order
    pub async fn load_latest(&self) -> Option<(TierKind, BackupSnapshot)> {
        for tier in self.available_tiers().await {
            match tier.load().await {
                Ok(Some(snapshot)) => return Some((tier.kind(), snapshot)),
                Ok(None) => {}
                Err(error) => tracing::warn!("Reading backup from {} failed: {error}", tier.kind()),
            }
        }
        None
    }

    /// Backup files in the discovery directories and next to file tiers
    pub async fn find_all_backup_files(&self) -> Vec<BackupCandidate> {
        let mut dirs: Vec<PathBuf> = self
            .tiers
            .iter()
            .filter(|tier| matches!(tier.kind(), TierKind::AppData | TierKind::UserFile))
            .filter_map(|tier| tier.location().and_then(Path::parent).map(Path::to_path_buf))
            .collect();
        for dir in self.discovery_dirs.iter() {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        discovery::scan_dirs(&dirs).await
    }

    pub async fn resolve_file_conflicts(
        &self,
        candidates: Vec<BackupCandidate>,
    ) -> Option<BackupCandidate> {
        discovery::resolve_file_conflicts(candidates).await
    }

    /// The single best backup file on disk, if any
    pub async fn detect_backup_file(&self) -> Option<BackupCandidate> {
        let candidates = self.find_all_backup_files().await;
        if candidates.is_empty() {
            return None;
        }
        self.resolve_file_conflicts(candidates).await
    }

    pub async fn has_backup_file(&self) -> bool {
        self.load_latest().await.is_some()
    }

    /// File name of the active tier's artifact
    pub async fn current_artifact_name(&self) -> Option<String> {
        self.available_tiers()
            .await
            .first()
            .and_then(|tier| tier.location().and_then(Path::file_name))
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub async fn tier_status(&self) -> Vec<TierStatus> {
        let available: Vec<TierKind> = self
            .available_tiers()
            .await
            .iter()
            .map(|tier| tier.kind())
            .collect();
        self.tiers
            .iter()
            .map(|tier| TierStatus {
                kind: tier.kind(),
                available: available.contains(&tier.kind()),
                location: tier.location().map(Path::to_path_buf),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupResult;
    use crate::Error;
    use crate::models::{Carrier, Client, Collection, Product, Template, TemplateKind, WeighTicket};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    struct FailingTier {
        kind: TierKind,
        error: BackupErrorKind,
    }

    #[async_trait]
    impl BackupTier for FailingTier {
        fn kind(&self) -> TierKind {
            self.kind
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn save(&self, _snapshot: &BackupSnapshot) -> BackupResult<()> {
            Err(BackupError::new(self.error, "simulated"))
        }

        async fn load(&self) -> BackupResult<Option<BackupSnapshot>> {
            Err(BackupError::new(self.error, "simulated"))
        }
    }

    async fn seeded_db() -> DatabaseService {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let client = Client::new("Acme Quarries");
        let product = Product::new("Crushed stone", 1_850);
        let carrier = Carrier::new("Fast Haul");
        let mut ticket = WeighTicket::new("T-000001", client.id.clone(), 32_000, 12_000);
        ticket.product_id = Some(product.id.clone());
        ticket.carrier_id = Some(carrier.id.clone());

        db.put(&client).await.unwrap();
        db.put(&product).await.unwrap();
        db.put(&carrier).await.unwrap();
        db.put(&ticket).await.unwrap();
        db.put(&Template::new("Ticket", TemplateKind::Ticket, "{{number}}"))
            .await
            .unwrap();

        let mut settings = db.load_settings().await.unwrap();
        settings.company_name = "Tare Weighbridge Ltd".to_string();
        settings.next_ticket_number = 2;
        db.save_settings(&settings).await.unwrap();
        db
    }

    fn app_data_engine(db: DatabaseService, dir: &TempDir) -> BackupEngine {
        BackupEngine::new(db, vec![Arc::new(AppDataTier::new(dir.path()))])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_then_restore_into_empty_store_is_identical() {
        let dir = tempdir().unwrap();
        let source = seeded_db().await;
        let engine = app_data_engine(source.clone(), &dir);
        assert_eq!(engine.save_now().await.unwrap(), Some(TierKind::AppData));

        let target = DatabaseService::open_in_memory().await.unwrap();
        let restorer = app_data_engine(target.clone(), &dir);
        let summary = restorer
            .restore_from_file(&dir.path().join("tare-backup.json"))
            .await
            .unwrap();
        assert_eq!(summary.records, 5);

        let (expected, expected_settings) = source.export_all().await.unwrap();
        let (actual, actual_settings) = target.export_all().await.unwrap();
        assert_eq!(actual, expected);
        assert_eq!(actual_settings, expected_settings);
        for collection in Collection::ALL {
            assert_eq!(
                target.count(collection).await.unwrap(),
                source.count(collection).await.unwrap()
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unparsable_file_is_corruption_and_store_is_untouched() {
        let dir = tempdir().unwrap();
        let db = seeded_db().await;
        let before = db.export_all().await.unwrap();
        let path = dir.path().join("tare-backup.json");
        std::fs::write(&path, "this is not a backup").unwrap();

        let engine = app_data_engine(db.clone(), &dir);
        let error = engine.restore_from_file(&path).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Backup(BackupError {
                kind: BackupErrorKind::Corruption,
                ..
            })
        ));
        assert_eq!(db.export_all().await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_with_untyped_records_is_refused() {
        let dir = tempdir().unwrap();
        let db = seeded_db().await;
        let before = db.export_all().await.unwrap();

        let collections = std::collections::BTreeMap::from([(
            Collection::Clients,
            vec![serde_json::json!({ "id": "c1" })],
        )]);
        let snapshot =
            BackupSnapshot::new(collections, crate::models::Settings::default()).unwrap();

        let engine = app_data_engine(db.clone(), &dir);
        let error = engine.restore_from_snapshot(&snapshot).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Backup(BackupError {
                kind: BackupErrorKind::Corruption,
                ..
            })
        ));
        assert_eq!(db.export_all().await.unwrap(), before);
        assert_eq!(db.list::<Client>().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_tier_falls_back_to_next() {
        let dir = tempdir().unwrap();
        let engine = BackupEngine::new(
            seeded_db().await,
            vec![
                Arc::new(FailingTier {
                    kind: TierKind::UserFile,
                    error: BackupErrorKind::Quota,
                }),
                Arc::new(AppDataTier::new(dir.path())),
            ],
        );
        let mut states = engine.subscribe_state();

        assert_eq!(engine.force_save().await.unwrap(), TierKind::AppData);
        assert!(matches!(
            *states.borrow_and_update(),
            BackupState::Persisted {
                tier: TierKind::AppData,
                ..
            }
        ));
        assert!(dir.path().join("tare-backup.json").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_tiers_failing_reports_every_error() {
        let engine = BackupEngine::new(
            seeded_db().await,
            vec![
                Arc::new(FailingTier {
                    kind: TierKind::AppData,
                    error: BackupErrorKind::Permission,
                }),
                Arc::new(FailingTier {
                    kind: TierKind::Emergency,
                    error: BackupErrorKind::Quota,
                }),
            ],
        );

        let error = engine.force_save().await.unwrap_err();
        assert!(matches!(
            error,
            Error::Backup(BackupError {
                kind: BackupErrorKind::Permission,
                ..
            })
        ));
        let BackupState::FailedAll { errors } = engine.state() else {
            panic!("expected failed-all state");
        };
        assert_eq!(
            errors.iter().map(|failure| failure.error.kind).collect::<Vec<_>>(),
            vec![BackupErrorKind::Permission, BackupErrorKind::Quota]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initialize_skips_unavailable_tiers() {
        let dir = tempdir().unwrap();
        let engine = BackupEngine::new(
            DatabaseService::open_in_memory().await.unwrap(),
            vec![
                Arc::new(UserFileTier::new(None)),
                Arc::new(AppDataTier::new(dir.path())),
            ],
        );

        assert_eq!(engine.initialize().await, vec![TierKind::AppData]);
        assert_eq!(engine.active_tier().await, Some(TierKind::AppData));
        assert_eq!(
            engine.current_artifact_name().await.as_deref(),
            Some("tare-backup.json")
        );
        let status = engine.tier_status().await;
        assert!(!status[0].available);
        assert!(status[1].available);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_is_skipped_while_another_is_in_flight() {
        let dir = tempdir().unwrap();
        let engine = app_data_engine(seeded_db().await, &dir);

        let guard = engine.in_flight.lock().await;
        assert_eq!(engine.save_now().await.unwrap(), None);
        drop(guard);
        assert_eq!(engine.save_now().await.unwrap(), Some(TierKind::AppData));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn detect_prefers_newest_valid_file() {
        let backups = tempdir().unwrap();
        let downloads = tempdir().unwrap();
        let db = seeded_db().await;
        let engine = app_data_engine(db, &backups)
            .with_discovery_dirs(vec![downloads.path().to_path_buf()]);
        engine.save_now().await.unwrap();

        // Copy in downloads, made later
        let copy = downloads.path().join("tare-backup (1).json");
        std::fs::copy(backups.path().join("tare-backup.json"), &copy).unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&copy)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(engine.find_all_backup_files().await.len(), 2);
        assert_eq!(engine.detect_backup_file().await.unwrap().path, copy);
        assert!(engine.has_backup_file().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_latest_falls_back_past_unreadable_tiers() {
        let dir = tempdir().unwrap();
        let db = seeded_db().await;
        app_data_engine(db.clone(), &dir).save_now().await.unwrap();

        let engine = BackupEngine::new(
            db,
            vec![
                Arc::new(FailingTier {
                    kind: TierKind::UserFile,
                    error: BackupErrorKind::Permission,
                }),
                Arc::new(AppDataTier::new(dir.path())),
            ],
        );
        let (tier, snapshot) = engine.load_latest().await.unwrap();
        assert_eq!(tier, TierKind::AppData);
        assert_eq!(snapshot.record_count(), 5);
    }
}
