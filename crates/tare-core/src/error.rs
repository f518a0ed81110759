//! Error types for tare-core

use thiserror::Error;

use crate::backup::BackupError;

/// Result type alias using tare-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tare-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backup or restore failure, classified
    #[error(transparent)]
    Backup(#[from] BackupError),
}
