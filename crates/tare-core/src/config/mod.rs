//! Runtime configuration.
//!
//! A single JSON file under the user's config directory. Every field has a
//! default so a missing or partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "tare";
const RELAY_TOKEN_ENV: &str = "TARE_RELAY_TOKEN";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TareConfig {
    pub version: u32,
    pub backup: BackupConfig,
    pub queue: QueueConfig,
    pub relay: RelayConfig,
}

/// Backup engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackupConfig {
    /// Periodic backup interval
    pub interval_minutes: u64,
    /// Quiet period after a mutation before a backup runs
    pub debounce_secs: u64,
    /// App-private backup directory; defaults to `<data_dir>/tare/backups`
    pub directory: Option<PathBuf>,
    /// Backup file location chosen by the operator
    pub user_file: Option<PathBuf>,
    /// Extra directories scanned when looking for backup files
    pub search_dirs: Vec<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            debounce_secs: 3,
            directory: None,
            user_file: None,
            search_dirs: Vec::new(),
        }
    }
}

/// Retry scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub retention_days: u32,
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retention_days: 7,
            poll_interval_secs: 30,
        }
    }
}

/// Regulatory relay endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

impl TareConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!(
                "Failed to parse config at {}: {}",
                path.display(),
                error
            ))
        })?;
        config.normalize()?;
        Ok(config)
    }

    /// Write to a path, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize()?;
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Trim text, clamp numeric settings, and validate the relay URL
    pub fn normalize(&mut self) -> Result<()> {
        self.version = self.version.max(1);
        self.backup.interval_minutes = self.backup.interval_minutes.max(1);
        self.queue.max_attempts = self.queue.max_attempts.max(1);
        self.queue.retention_days = self.queue.retention_days.max(1);
        self.queue.poll_interval_secs = self.queue.poll_interval_secs.max(1);

        self.relay.base_url = normalize_text_option(self.relay.base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.relay.token = normalize_text_option(self.relay.token.take());

        if let Some(url) = &self.relay.base_url {
            if !is_http_url(url) {
                return Err(Error::InvalidInput(
                    "relay.base_url must include http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// App-private backup directory
    pub fn backup_directory(&self) -> PathBuf {
        self.backup.directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
                .join("backups")
        })
    }

    /// Directories scanned for backup files, deduplicated, in priority order
    pub fn discovery_dirs(&self) -> Vec<PathBuf> {
        let mut dirs_out = vec![self.backup_directory()];
        if let Some(parent) = self.backup.user_file.as_deref().and_then(Path::parent) {
            dirs_out.push(parent.to_path_buf());
        }
        if self.backup.search_dirs.is_empty() {
            dirs_out.extend(dirs::document_dir());
            dirs_out.extend(dirs::download_dir());
        } else {
            dirs_out.extend(self.backup.search_dirs.iter().cloned());
        }

        let mut seen = Vec::new();
        dirs_out.retain(|dir| {
            if seen.contains(dir) {
                false
            } else {
                seen.push(dir.clone());
                true
            }
        });
        dirs_out
    }

    /// Relay credential; the environment overrides the file
    pub fn relay_token(&self) -> Option<String> {
        normalize_text_option(std::env::var(RELAY_TOKEN_ENV).ok())
            .or_else(|| self.relay.token.clone())
    }

    pub const fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup.interval_minutes * 60)
    }

    pub const fn backup_debounce(&self) -> Duration {
        Duration::from_secs(self.backup.debounce_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue.poll_interval_secs)
    }
}
