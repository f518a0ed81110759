use std::io;

use tare_core::backup::BackupError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tare_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Weigh ticket not found: {0}")]
    TicketNotFound(String),
    #[error("Ticket id cannot be empty")]
    EmptyTicketId,
    #[error("Restore cancelled")]
    RestoreCancelled,
}

impl CliError {
    /// Actionable next step to print after the error
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Core(tare_core::Error::Backup(BackupError { kind, .. })) => {
                Some(format!("Try to {}.", kind.suggestion()))
            }
            Self::TicketNotFound(_) => {
                Some("Check the ticket id; it must exist in the local store.".to_string())
            }
            _ => None,
        }
    }
}
