//! Sync conflict model

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Collection;

/// How a detected divergence was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Local content kept
    LocalWins,
    /// Server content applied locally
    ServerWins,
    /// Left for the operator; local record untouched
    Manual,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local-wins",
            Self::ServerWins => "server-wins",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local-wins" => Some(Self::LocalWins),
            "server-wins" => Some(Self::ServerWins),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record written once per detected divergence, before resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict row identifier
    pub id: i64,
    pub collection: Collection,
    /// Identifier of the diverging record
    pub record_id: String,
    pub local_version: i64,
    pub server_version: i64,
    /// Full local snapshot at detection time
    pub local_data: serde_json::Value,
    /// Full server snapshot at detection time
    pub server_data: serde_json::Value,
    pub resolution: Resolution,
    /// Unix ms
    pub created_at: i64,
}
