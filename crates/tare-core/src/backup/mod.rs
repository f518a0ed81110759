//! Durable mirror of the local dataset.
//!
//! [`BackupEngine`] serialises every collection and the settings into a
//! [`BackupSnapshot`] and writes it to the first available [`BackupTier`].
//! [`BackupScheduler`] drives it on a timer and after mutations.

mod discovery;
mod engine;
mod error;
mod scheduler;
mod snapshot;
mod tier;

pub use discovery::{is_backup_file_name, BackupCandidate};
pub use engine::{BackupEngine, BackupState, RestoreSummary, TierFailure, TierStatus};
pub use error::{BackupError, BackupErrorKind, BackupResult};
pub use scheduler::BackupScheduler;
pub use snapshot::{BackupSnapshot, FORMAT_MARKER, SCHEMA_VERSION};
pub use tier::{
    AppDataTier, BackupTier, EmergencyTier, StructuredStoreTier, TierKind, UserFileTier,
    BACKUP_FILE_NAME,
};
