use tare_core::sync::ConflictResolver;

use crate::cli::ConflictCommands;
use crate::commands::common::{format_conflict_lines, Context};
use crate::error::CliError;

pub async fn run_conflicts(command: ConflictCommands, ctx: &Context) -> Result<(), CliError> {
    let resolver = ConflictResolver::new(ctx.open().await?);

    match command {
        ConflictCommands::List { json } => {
            let conflicts = resolver.get_recent_conflicts().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conflicts)?);
            } else if conflicts.is_empty() {
                println!("No sync conflicts recorded");
            } else {
                for line in format_conflict_lines(&conflicts) {
                    println!("{line}");
                }
            }
        }
        ConflictCommands::Count => {
            println!("{}", resolver.get_conflict_count().await?);
        }
        ConflictCommands::Cleanup => {
            let removed = resolver.cleanup_old_conflicts().await?;
            println!("Removed {removed} conflicts");
        }
    }

    Ok(())
}
