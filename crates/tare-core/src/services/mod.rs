//! Shared services used across clients.

mod database;

pub use database::{Change, DatabaseService};
