//! Wake-up registrations for the queue worker.
//!
//! Some hosts only wake a background worker for a tag that was registered with
//! them, one shot per tag. The queue talks to that mechanism through
//! [`WakePort`] so it can be replaced in tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::Result;

#[async_trait]
pub trait WakePort: Send + Sync {
    /// Ask the host to wake the worker for `tag`.
    async fn register_wake(&self, tag: &str) -> Result<()>;

    /// Receive tags whose wake-up fired.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-process wake port: registrations fire immediately to every subscriber.
#[derive(Debug, Clone)]
pub struct BroadcastWakePort {
    sender: broadcast::Sender<String>,
}

impl Default for BroadcastWakePort {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastWakePort {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

#[async_trait]
impl WakePort for BroadcastWakePort {
    async fn register_wake(&self, tag: &str) -> Result<()> {
        // No subscriber yet just means nobody is waiting; the poll loop still runs
        if self.sender.send(tag.to_string()).is_err() {
            tracing::debug!("Wake registered for {tag} with no active worker");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}
