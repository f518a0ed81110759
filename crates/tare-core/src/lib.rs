//! tare-core - Core library for Tare
//!
//! Offline-first core of the weighbridge app: the local libSQL store, the
//! retrying sync queue, the local-wins conflict resolver, the tiered
//! backup/restore engine and the first-run auto-restore flow. Every component
//! takes its collaborators explicitly; construct one of each at startup.

pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod restore;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, Entity, Settings, WeighTicket};
pub use services::DatabaseService;
