use serde::Serialize;
use tare_core::backup::{BackupCandidate, TierKind, TierStatus};

use crate::cli::BackupCommands;
use crate::commands::common::{format_candidate_line, format_timestamp, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct BackupStatusReport {
    pub tiers: Vec<TierStatus>,
    pub active_tier: Option<TierKind>,
    pub artifact: Option<String>,
    pub latest_tier: Option<TierKind>,
    pub latest_generated_at: Option<i64>,
    pub latest_records: Option<usize>,
}

pub async fn run_backup(command: BackupCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        BackupCommands::Now => {
            let tier = backup_now(ctx).await?;
            println!("Backup written to the {tier} tier");
        }
        BackupCommands::Status { json } => {
            let report = backup_status(ctx).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in format_status_lines(&report) {
                    println!("{line}");
                }
            }
        }
        BackupCommands::List { json } => {
            let candidates = list_backup_files(ctx).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else if candidates.is_empty() {
                println!("No backup files found");
            } else {
                for candidate in &candidates {
                    println!("{}", format_candidate_line(candidate));
                }
            }
        }
        BackupCommands::Detect { json } => {
            let engine = ctx.engine(ctx.open().await?);
            let candidate = engine.detect_backup_file().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidate)?);
            } else {
                match candidate {
                    Some(candidate) => println!("{}", format_candidate_line(&candidate)),
                    None => println!("No usable backup file found"),
                }
            }
        }
    }
    Ok(())
}

pub async fn backup_now(ctx: &Context) -> Result<TierKind, CliError> {
    let engine = ctx.engine(ctx.open().await?);
    engine.initialize().await;
    Ok(engine.force_save().await?)
}

pub async fn backup_status(ctx: &Context) -> Result<BackupStatusReport, CliError> {
    let engine = ctx.engine(ctx.open().await?);
    engine.initialize().await;
    let latest = engine.load_latest().await;
    Ok(BackupStatusReport {
        tiers: engine.tier_status().await,
        active_tier: engine.active_tier().await,
        artifact: engine.current_artifact_name().await,
        latest_tier: latest.as_ref().map(|(tier, _)| *tier),
        latest_generated_at: latest.as_ref().map(|(_, snapshot)| snapshot.generated_at),
        latest_records: latest.as_ref().map(|(_, snapshot)| snapshot.record_count()),
    })
}

pub async fn list_backup_files(ctx: &Context) -> Result<Vec<BackupCandidate>, CliError> {
    let engine = ctx.engine(ctx.open().await?);
    Ok(engine.find_all_backup_files().await)
}

pub fn format_status_lines(report: &BackupStatusReport) -> Vec<String> {
    let mut lines = Vec::new();
    for tier in &report.tiers {
        let state = if tier.available { "available" } else { "unavailable" };
        let location = tier
            .location
            .as_ref()
            .map_or_else(String::new, |path| format!("  {}", path.display()));
        lines.push(format!("{:<17} {state:<11}{location}", tier.kind.as_str()));
    }
    lines.push(format!(
        "Active tier: {}",
        report
            .active_tier
            .map_or("none", TierKind::as_str)
    ));
    if let Some(artifact) = &report.artifact {
        lines.push(format!("Artifact:    {artifact}"));
    }
    match (report.latest_tier, report.latest_generated_at) {
        (Some(tier), Some(generated_at)) => lines.push(format!(
            "Latest:      {} from {tier} ({} records)",
            format_timestamp(generated_at),
            report.latest_records.unwrap_or_default()
        )),
        _ => lines.push("Latest:      no backup yet".to_string()),
    }
    lines
}
