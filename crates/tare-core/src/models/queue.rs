//! Sync queue models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed payload of a queued unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTask {
    /// Generate the regulatory waste-tracking document for a weigh ticket
    WasteDocument { ticket_id: String },
    /// Purge expired sync events, orphaned queue items and old conflicts
    RetentionCleanup,
}

impl SyncTask {
    /// Tag a fresh unit of work of this kind is registered under
    #[must_use]
    pub const fn base_tag(&self) -> &'static str {
        match self {
            Self::WasteDocument { .. } => "waste-document",
            Self::RetentionCleanup => "retention-cleanup",
        }
    }
}

/// A unit of deferred, retryable work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Row identifier, assigned on insert
    pub id: i64,
    /// Work type, plus a uniqueness suffix once re-registered
    pub tag: String,
    pub task: SyncTask,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Earliest time the item may run (Unix ms)
    pub next_attempt: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl QueueItem {
    /// Whether the item may be attempted at `now`
    #[must_use]
    pub const fn is_ready(&self, now: i64) -> bool {
        self.next_attempt <= now && self.attempt_count < self.max_attempts
    }
}

/// Lifecycle step a sync event was logged from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// Work admitted to the queue
    Enqueue,
    /// Outcome of one attempt
    Attempt,
    /// Attempts exhausted
    Abandon,
}

/// Outcome recorded by a sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventStatus {
    Pending,
    Success,
    Failed,
    Abandoned,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Storage name
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }

            /// Parse a storage name
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(SyncEventKind {
    Enqueue => "enqueue",
    Attempt => "attempt",
    Abandon => "abandon",
});

str_enum!(SyncEventStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
    Abandoned => "abandoned",
});

/// Append-only audit record of queue activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: i64,
    pub tag: String,
    pub kind: SyncEventKind,
    pub status: SyncEventStatus,
    pub message: String,
    /// Payload at the time of the event
    pub task: Option<SyncTask>,
    pub attempt_number: u32,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_json_shape() {
        let task = SyncTask::WasteDocument {
            ticket_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, r#"{"kind":"waste_document","ticket_id":"abc"}"#);

        let cleanup: SyncTask = serde_json::from_str(r#"{"kind":"retention_cleanup"}"#).unwrap();
        assert_eq!(cleanup, SyncTask::RetentionCleanup);
    }

    #[test]
    fn test_status_names_roundtrip() {
        for status in [
            SyncEventStatus::Pending,
            SyncEventStatus::Success,
            SyncEventStatus::Failed,
            SyncEventStatus::Abandoned,
        ] {
            assert_eq!(SyncEventStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncEventKind::parse("bogus"), None);
    }

    #[test]
    fn test_ready_requires_due_time_and_budget() {
        let item = QueueItem {
            id: 1,
            tag: "waste-document".to_string(),
            task: SyncTask::RetentionCleanup,
            attempt_count: 0,
            max_attempts: 2,
            next_attempt: 1_000,
            last_error: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(!item.is_ready(999));
        assert!(item.is_ready(1_000));

        let exhausted = QueueItem {
            attempt_count: 2,
            ..item
        };
        assert!(!exhausted.is_ready(5_000));
    }
}
