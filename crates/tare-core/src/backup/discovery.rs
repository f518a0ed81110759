//! Finding backup files left on disk by earlier installs or downloads.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::snapshot::BackupSnapshot;

/// A file that looks like a backup by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupCandidate {
    pub path: PathBuf,
    /// Last modification time (Unix ms)
    pub modified_ms: i64,
    pub size: u64,
}

impl BackupCandidate {
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Ok(Self {
            path: path.to_path_buf(),
            modified_ms,
            size: metadata.len(),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned())
    }
}

/// `tare-backup.json`, `tare-backup-2024-05-01.json`, `tare-backup (1).json`
pub fn is_backup_file_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^tare-backup(?:[-_ ][\w .()-]*)?\.json$").expect("Invalid regex")
        })
        .is_match(name)
}

/// Every matching file directly inside `dirs`, newest first.
///
/// Unreadable directories are skipped.
pub async fn scan_dirs(dirs: &[PathBuf]) -> Vec<BackupCandidate> {
    let mut candidates: Vec<BackupCandidate> = Vec::new();

    for dir in dirs {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!("Skipping backup search in {}: {error}", dir.display());
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    tracing::debug!("Stopped reading {}: {error}", dir.display());
                    break;
                }
            };
            let name = entry.file_name();
            if !is_backup_file_name(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if candidates.iter().any(|candidate| candidate.path == path) {
                continue;
            }
            match BackupCandidate::from_path(&path).await {
                Ok(candidate) if candidate.size > 0 => candidates.push(candidate),
                Ok(_) => {}
                Err(error) => tracing::debug!("Skipping {}: {error}", path.display()),
            }
        }
    }

    candidates.sort_by(|a, b| b.modified_ms.cmp(&a.modified_ms));
    candidates
}

/// Among candidates that parse as valid backups, the most recently modified
pub async fn resolve_file_conflicts(candidates: Vec<BackupCandidate>) -> Option<BackupCandidate> {
    let mut valid = Vec::new();
    for candidate in candidates {
        let parsed = match tokio::fs::read_to_string(&candidate.path).await {
            Ok(raw) => BackupSnapshot::parse(&raw).map(|_| ()).map_err(|error| error.to_string()),
            Err(error) => Err(error.to_string()),
        };
        match parsed {
            Ok(()) => valid.push(candidate),
            Err(error) => {
                tracing::warn!("Ignoring backup candidate {}: {error}", candidate.path.display());
            }
        }
    }

    if valid.len() > 1 {
        tracing::info!("Found {} valid backup files, choosing the newest", valid.len());
    }
    valid.into_iter().max_by_key(|candidate| candidate.modified_ms)
}
