//! Backup failure classification

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BackupResult<T> = std::result::Result<T, BackupError>;

/// Coarse failure class, each with its own remedy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupErrorKind {
    Quota,
    Permission,
    Corruption,
    Network,
    Other,
}

impl BackupErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::Permission => "permission",
            Self::Corruption => "corruption",
            Self::Network => "network",
            Self::Other => "other",
        }
    }

    /// What the operator can do about it
    pub const fn suggestion(self) -> &'static str {
        match self {
            Self::Quota => "free up disk space or choose a different backup location",
            Self::Permission => "grant access again or choose a different backup location",
            Self::Corruption => "pick a different backup file or continue with empty data",
            Self::Network => "check the connection and retry",
            Self::Other => "retry the backup",
        }
    }
}

impl fmt::Display for BackupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("backup {kind} error: {message}")]
pub struct BackupError {
    pub kind: BackupErrorKind,
    pub message: String,
}

impl BackupError {
    pub fn new(kind: BackupErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(BackupErrorKind::Corruption, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(BackupErrorKind::Other, message)
    }
}

// ENOSPC, EDQUOT, EROFS and the Windows disk-full codes
const OS_NO_SPACE: i32 = 28;
const OS_QUOTA: i32 = 122;
const OS_READ_ONLY: i32 = 30;
const WIN_DISK_FULL: i32 = 112;
const WIN_HANDLE_DISK_FULL: i32 = 39;

fn classify_io(error: &io::Error) -> BackupErrorKind {
    match error.raw_os_error() {
        Some(OS_NO_SPACE | OS_QUOTA) if cfg!(unix) => return BackupErrorKind::Quota,
        Some(OS_READ_ONLY) if cfg!(unix) => return BackupErrorKind::Permission,
        Some(WIN_DISK_FULL | WIN_HANDLE_DISK_FULL) if cfg!(windows) => {
            return BackupErrorKind::Quota;
        }
        _ => {}
    }

    match error.kind() {
        io::ErrorKind::PermissionDenied => BackupErrorKind::Permission,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => BackupErrorKind::Corruption,
        io::ErrorKind::TimedOut
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => BackupErrorKind::Network,
        _ => BackupErrorKind::Other,
    }
}

impl From<io::Error> for BackupError {
    fn from(error: io::Error) -> Self {
        Self::new(classify_io(&error), error.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_io() {
            return Self::other(error.to_string());
        }
        Self::corruption(format!("unreadable backup: {error}"))
    }
}

impl From<libsql::Error> for BackupError {
    fn from(error: libsql::Error) -> Self {
        let message = error.to_string();
        let lower = message.to_lowercase();
        let kind = if lower.contains("full") {
            BackupErrorKind::Quota
        } else if lower.contains("readonly") || lower.contains("permission") {
            BackupErrorKind::Permission
        } else if lower.contains("malformed") || lower.contains("not a database") {
            BackupErrorKind::Corruption
        } else {
            BackupErrorKind::Other
        };
        Self::new(kind, message)
    }
}
