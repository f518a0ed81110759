use tare_core::models::{SyncTask, WeighTicket};
use tare_core::sync::{CleanupReport, ConflictResolver, QueueStats, SyncQueue, WorkerReport};
use tare_core::util::now_ms;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_queue_item_lines, format_relative_time, format_timestamp, new_wake_port, Context,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        QueueCommands::Stats { json } => run_stats(json, ctx).await,
        QueueCommands::List { limit, json } => run_list(limit, json, ctx).await,
        QueueCommands::EnqueueDocument {
            ticket_id,
            max_attempts,
        } => {
            let id = enqueue_document(&ticket_id, max_attempts, ctx).await?;
            println!("Queued waste document for ticket {} as item {id}", ticket_id.trim());
            Ok(())
        }
        QueueCommands::Cleanup => {
            let (queue_report, conflicts) = cleanup(ctx).await?;
            println!(
                "Removed {} queue items, {} events and {conflicts} conflicts",
                queue_report.items, queue_report.events
            );
            Ok(())
        }
        QueueCommands::Run { json } => {
            let report = run_once(ctx).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.processed() == 0 {
                println!("Nothing ready");
            } else {
                println!(
                    "Processed {}: {} succeeded, {} failed, {} abandoned",
                    report.processed(),
                    report.succeeded,
                    report.failed,
                    report.abandoned
                );
            }
            Ok(())
        }
    }
}

async fn open_queue(ctx: &Context) -> Result<SyncQueue, CliError> {
    let db = ctx.open().await?;
    Ok(ctx.queue(db, new_wake_port()))
}

pub async fn load_stats(ctx: &Context) -> Result<QueueStats, CliError> {
    Ok(open_queue(ctx).await?.get_stats().await?)
}

async fn run_stats(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let stats = load_stats(ctx).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    for line in format_stats_lines(&stats, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_stats_lines(stats: &QueueStats, now_ms: i64) -> Vec<String> {
    let mut lines = vec![
        format!("Queued items:  {}", stats.total),
        format!("Pending:       {}", stats.pending),
    ];
    if let Some(oldest) = stats.oldest_pending_at {
        lines.push(format!(
            "Oldest pending: {} ({})",
            format_timestamp(oldest),
            format_relative_time(oldest, now_ms)
        ));
    }
    lines.push(format!(
        "Last success:  {}",
        stats
            .last_success_at
            .map_or_else(|| "never".to_string(), format_timestamp)
    ));
    if !stats.recent_events.is_empty() {
        lines.push("Recent events:".to_string());
        for event in &stats.recent_events {
            lines.push(format!(
                "  {}  {:<8} {:<9} {}  {}",
                format_timestamp(event.created_at),
                event.kind.as_str(),
                event.status.as_str(),
                event.tag,
                event.message
            ));
        }
    }
    lines
}

async fn run_list(limit: usize, as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let items = open_queue(ctx).await?.list_items(limit).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("Queue is empty");
    } else {
        for line in format_queue_item_lines(&items, now_ms()) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Queue document generation for an existing ticket
pub async fn enqueue_document(
    ticket_id: &str,
    max_attempts: Option<u32>,
    ctx: &Context,
) -> Result<i64, CliError> {
    let ticket_id = ticket_id.trim();
    if ticket_id.is_empty() {
        return Err(CliError::EmptyTicketId);
    }

    let db = ctx.open().await?;
    if db.get::<WeighTicket>(ticket_id).await?.is_none() {
        return Err(CliError::TicketNotFound(ticket_id.to_string()));
    }

    let queue = ctx.queue(db, new_wake_port());
    let task = SyncTask::WasteDocument {
        ticket_id: ticket_id.to_string(),
    };
    let max_attempts = max_attempts.unwrap_or(ctx.config.queue.max_attempts);
    Ok(queue.enqueue(task.base_tag(), &task, max_attempts).await?)
}

pub async fn cleanup(ctx: &Context) -> Result<(CleanupReport, u64), CliError> {
    let db = ctx.open().await?;
    let report = ctx.queue(db.clone(), new_wake_port()).cleanup_old_events().await?;
    let conflicts = ConflictResolver::new(db).cleanup_old_conflicts().await?;
    Ok((report, conflicts))
}

pub async fn run_once(ctx: &Context) -> Result<WorkerReport, CliError> {
    let db = ctx.open().await?;
    let queue = ctx.queue(db.clone(), new_wake_port());
    Ok(ctx.worker(db, queue)?.process_ready().await?)
}
