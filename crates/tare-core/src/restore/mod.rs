//! First-run auto-restore.
//!
//! When the local store has no core data, look for a backup file on disk and
//! offer to restore it. Existing data is never overwritten by this flow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::backup::{BackupCandidate, BackupEngine};
use crate::models::Collection;
use crate::services::DatabaseService;
use crate::Result;

/// Marker set once the automatic first-run check has run
pub const AUTO_RESTORE_CHECKED_KEY: &str = "auto_restore.checked";

/// Operator interaction for the restore flow
#[async_trait]
pub trait RestorePrompt: Send + Sync {
    /// Ask whether to restore from `candidate`
    async fn confirm(&self, candidate: &BackupCandidate) -> bool;

    /// Tell the operator a restore failed and what to do next
    async fn report_failure(&self, message: &str);
}

pub struct AutoRestore {
    db: DatabaseService,
    engine: BackupEngine,
    prompt: Arc<dyn RestorePrompt>,
}

impl AutoRestore {
    pub fn new(db: DatabaseService, engine: BackupEngine, prompt: Arc<dyn RestorePrompt>) -> Self {
        Self { db, engine, prompt }
    }

    /// Whether any core collection holds records
    pub async fn has_existing_data(&self) -> Result<bool> {
        self.db.has_records_in(&Collection::CORE).await
    }

    /// Run the first-run check once per store.
    ///
    /// Returns whether data was restored.
    pub async fn check_for_auto_restore(&self) -> Result<bool> {
        if self.db.get_meta(AUTO_RESTORE_CHECKED_KEY).await?.is_some() {
            tracing::debug!("Auto-restore already checked");
            return Ok(false);
        }
        let restored = self.run_check().await?;
        self.db
            .set_meta(AUTO_RESTORE_CHECKED_KEY, &crate::util::now_ms().to_string())
            .await?;
        Ok(restored)
    }

    /// Same as the first-run check, ignoring the marker
    pub async fn force_check(&self) -> Result<bool> {
        self.run_check().await
    }

    async fn run_check(&self) -> Result<bool> {
        if self.has_existing_data().await? {
            tracing::info!("Local data present, auto-restore suppressed");
            return Ok(false);
        }

        let Some(candidate) = self.engine.detect_backup_file().await else {
            tracing::info!("No backup file found, starting empty");
            return Ok(false);
        };

        if !self.prompt.confirm(&candidate).await {
            tracing::info!("Restore from {} declined", candidate.path.display());
            return Ok(false);
        }

        match self.engine.restore_from_file(&candidate.path).await {
            Ok(summary) => {
                tracing::info!(
                    "Auto-restored {} records from {}",
                    summary.records,
                    candidate.path.display()
                );
                Ok(true)
            }
            Err(error) => {
                tracing::error!("Auto-restore from {} failed: {error}", candidate.path.display());
                self.prompt
                    .report_failure(&format!(
                        "Restoring {} failed: {error}. Use `tare restore <PATH>` to restore a backup manually.",
                        candidate.path.display()
                    ))
                    .await;
                Ok(false)
            }
        }
    }
}
