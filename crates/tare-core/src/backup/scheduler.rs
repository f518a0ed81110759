//! Periodic and change-triggered backups.
//!
//! The scheduler owns its task handle. Starting twice is a no-op, and a burst
//! of mutations inside the debounce window results in one backup.

use std::future;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::engine::BackupEngine;

pub struct BackupScheduler {
    engine: BackupEngine,
    debounce: Duration,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl BackupScheduler {
    pub const fn new(engine: BackupEngine, debounce: Duration) -> Self {
        Self {
            engine,
            debounce,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Start backing up every `interval` and after mutations.
    ///
    /// Returns `false` if already running.
    pub fn start(&mut self, interval: Duration) -> bool {
        if self.is_running() {
            tracing::debug!("Backup scheduler already running");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let debounce = self.debounce;
        let handle = tokio::spawn(run_loop(engine, interval, debounce, stop_rx));
        self.running = Some((stop_tx, handle));

        tracing::info!(
            "Auto backup every {}s, {}ms after changes",
            interval.as_secs(),
            debounce.as_millis()
        );
        true
    }

    /// Stop after any in-progress backup finishes. Returns `false` if idle.
    pub async fn stop(&mut self) -> bool {
        let Some((stop_tx, handle)) = self.running.take() else {
            return false;
        };
        stop_tx.send_replace(true);
        if let Err(error) = handle.await {
            tracing::warn!("Backup scheduler ended abnormally: {error}");
        }
        tracing::info!("Auto backup stopped");
        true
    }
}

async fn run_loop(
    engine: BackupEngine,
    interval: Duration,
    debounce: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut changes = engine.database().subscribe_changes();
    let mut changes_open = true;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                pending = None;
                backup(&engine).await;
            }
            () = wait_until(pending) => {
                pending = None;
                backup(&engine).await;
            }
            change = changes.recv(), if changes_open => match change {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    pending = Some(Instant::now() + debounce);
                }
                Err(RecvError::Closed) => changes_open = false,
            },
            _ = stop.changed() => break,
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn backup(engine: &BackupEngine) {
    match engine.save_now().await {
        Ok(Some(tier)) => tracing::debug!("Scheduled backup written to {tier}"),
        Ok(None) => {}
        Err(error) => tracing::error!("Scheduled backup failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{AppDataTier, BackupState};
    use crate::models::Client;
    use crate::services::DatabaseService;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn engine(dir: &std::path::Path) -> BackupEngine {
        let db = DatabaseService::open_in_memory().await.unwrap();
        BackupEngine::new(db, vec![Arc::new(AppDataTier::new(dir))])
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_is_idempotent_and_stop_is_clean() {
        let dir = tempdir().unwrap();
        let mut scheduler = BackupScheduler::new(engine(dir.path()).await, Duration::from_secs(3));

        assert!(scheduler.start(Duration::from_secs(300)));
        assert!(!scheduler.start(Duration::from_secs(300)));
        assert!(scheduler.is_running());

        assert!(scheduler.stop().await);
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop().await);

        assert!(scheduler.start(Duration::from_secs(300)));
        assert!(scheduler.stop().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutations_trigger_a_debounced_backup() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path()).await;
        let db = engine.database().clone();
        let mut states = engine.subscribe_state();
        let mut scheduler = BackupScheduler::new(engine, Duration::from_millis(50));
        scheduler.start(Duration::from_secs(3600));

        for n in 0..5 {
            db.put(&Client::new(format!("Client {n}"))).await.unwrap();
        }

        let persisted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                states.changed().await.unwrap();
                if matches!(*states.borrow_and_update(), BackupState::Persisted { .. }) {
                    break;
                }
            }
        })
        .await;
        assert!(persisted.is_ok());
        assert!(dir.path().join("tare-backup.json").exists());
        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interval_tick_triggers_backup() {
        let dir = tempdir().unwrap();
        let mut scheduler =
            BackupScheduler::new(engine(dir.path()).await, Duration::from_secs(3));
        scheduler.start(Duration::from_millis(100));

        let path = dir.path().join("tare-backup.json");
        let mut written = false;
        for _ in 0..50 {
            if path.exists() {
                written = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(written);
        scheduler.stop().await;
    }
}
