use std::sync::Arc;

use tare_core::backup::BackupScheduler;
use tare_core::models::SyncTask;
use tare_core::restore::AutoRestore;
use tare_core::sync::SyncQueue;
use tare_core::util::now_ms;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::commands::common::{new_wake_port, Context, TerminalPrompt};
use crate::error::CliError;

/// Queue a retention cleanup unless one is already pending. The worker
/// re-queues each finished cleanup for the following day.
pub(crate) async fn schedule_retention(queue: &SyncQueue) -> Result<(), CliError> {
    if queue
        .ensure_scheduled(SyncTask::RetentionCleanup, now_ms())
        .await?
        .is_none()
    {
        info!("Retention cleanup already scheduled");
    }
    Ok(())
}

/// Run auto backup and the queue worker until Ctrl-C
pub async fn run_daemon(ctx: &Context) -> Result<(), CliError> {
    let db = ctx.open().await?;
    let engine = ctx.engine(db.clone());
    let available = engine.initialize().await;
    info!(tiers = ?available, "Backup tiers probed");

    let auto_restore = AutoRestore::new(
        db.clone(),
        engine.clone(),
        Arc::new(TerminalPrompt::new(false)),
    );
    if auto_restore.check_for_auto_restore().await? {
        println!("Restored local data from backup");
    }

    let mut scheduler = BackupScheduler::new(engine.clone(), ctx.config.backup_debounce());
    scheduler.start(ctx.config.backup_interval());

    let queue = ctx.queue(db.clone(), new_wake_port());
    schedule_retention(&queue).await?;
    let worker = ctx.worker(db, queue)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    println!("Tare daemon running, press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;
    info!("Shutting down");

    shutdown_tx.send_replace(true);
    if let Err(join_error) = worker_handle.await {
        warn!("Queue worker stopped abnormally: {join_error}");
    }
    scheduler.stop().await;

    if let Err(backup_error) = engine.force_save().await {
        error!("Final backup failed: {backup_error}");
    }

    signal?;
    Ok(())
}
