use std::path::Path;
use std::sync::Arc;

use tare_core::backup::{BackupCandidate, RestoreSummary};
use tare_core::restore::{AutoRestore, RestorePrompt};

use crate::commands::common::{format_timestamp, Context, TerminalPrompt};
use crate::error::CliError;

pub async fn run_restore(
    path: Option<&Path>,
    auto: bool,
    assume_yes: bool,
    ctx: &Context,
) -> Result<(), CliError> {
    let prompt = TerminalPrompt::new(assume_yes);

    let path = match path {
        Some(path) if !auto => path,
        _ => {
            if restore_auto(Arc::new(prompt), ctx).await? {
                println!("Restored local data from backup");
            } else {
                println!("Nothing restored");
            }
            return Ok(());
        }
    };

    let candidate = BackupCandidate::from_path(path).await?;
    if !prompt
        .ask(format!(
            "Replace all local data with {}?",
            candidate.path.display()
        ))
        .await
    {
        return Err(CliError::RestoreCancelled);
    }

    let summary = restore_file(path, ctx).await?;
    println!(
        "Restored {} records from backup generated {}{}",
        summary.records,
        format_timestamp(summary.generated_at),
        if summary.minimal { " (minimal snapshot)" } else { "" }
    );
    Ok(())
}

pub async fn restore_file(path: &Path, ctx: &Context) -> Result<RestoreSummary, CliError> {
    let engine = ctx.engine(ctx.open().await?);
    Ok(engine.restore_from_file(path).await?)
}

pub async fn restore_auto(prompt: Arc<dyn RestorePrompt>, ctx: &Context) -> Result<bool, CliError> {
    let db = ctx.open().await?;
    let engine = ctx.engine(db.clone());
    Ok(AutoRestore::new(db, engine, prompt).force_check().await?)
}
