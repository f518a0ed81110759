pub mod backup;
pub mod common;
pub mod conflicts;
pub mod daemon;
pub mod queue;
pub mod restore;
