//! Background sync: the retry scheduler, conflict resolution, and the worker
//! that pushes queued work to the regulatory relay.

mod backoff;
mod conflict;
mod document;
mod queue;
mod wake;
mod worker;

pub use backoff::Backoff;
pub use conflict::{ConflictInfo, ConflictResolver};
pub use document::{DocumentClient, DocumentRequest, DocumentResponse, HttpDocumentClient};
pub use queue::{
    CleanupReport, FailureOutcome, QueueStats, SyncQueue, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETENTION_DAYS,
};
pub use wake::{BroadcastWakePort, WakePort};
pub use worker::{SyncWorker, TaskError, WorkerReport};
