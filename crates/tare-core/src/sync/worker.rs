//! Queue worker: drains ready items and reports each outcome back to the
//! scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::models::{Carrier, Client, Product, SyncTask, WeighTicket};
use crate::services::DatabaseService;
use crate::util::now_ms;
use crate::Result;

use super::conflict::ConflictResolver;
use super::document::{DocumentClient, DocumentRequest};
use super::queue::{duration_ms, FailureOutcome, SyncQueue};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a task attempt failed. The queue retries every variant.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("weigh ticket {0} not found")]
    TicketNotFound(String),

    #[error("client {0} not found")]
    ClientNotFound(String),

    #[error("relay is not configured")]
    RelayNotConfigured,

    #[error("relay token is not configured")]
    TokenNotConfigured,

    /// The relay answered with a failure
    #[error("{0}")]
    Rejected(String),

    #[error("relay reported success without a document id")]
    MissingDocumentId,

    #[error(transparent)]
    Storage(#[from] crate::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub succeeded: u32,
    pub failed: u32,
    pub abandoned: u32,
}

impl WorkerReport {
    pub const fn processed(&self) -> u32 {
        self.succeeded + self.failed + self.abandoned
    }
}

#[derive(Clone)]
pub struct SyncWorker {
    db: DatabaseService,
    queue: SyncQueue,
    conflicts: ConflictResolver,
    documents: Option<Arc<dyn DocumentClient>>,
    token: Option<String>,
    poll_interval: Duration,
    cleanup_interval: Duration,
}

impl SyncWorker {
    pub fn new(db: DatabaseService, queue: SyncQueue, conflicts: ConflictResolver) -> Self {
        Self {
            db,
            queue,
            conflicts,
            documents: None,
            token: None,
            poll_interval: Duration::from_secs(30),
            cleanup_interval: CLEANUP_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentClient>, token: Option<String>) -> Self {
        self.documents = Some(documents);
        self.token = token;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Delay between a finished retention cleanup and the next one
    #[must_use]
    pub const fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    /// Attempt every ready item once.
    ///
    /// A failing task only costs its own item an attempt; the rest of the
    /// pass still runs. Errors from the queue itself end the pass.
    pub async fn process_ready(&self) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();

        for item in self.queue.get_ready_items().await? {
            let started = Instant::now();
            match self.execute(&item.task).await {
                Ok(()) => {
                    self.queue
                        .mark_success(item.id, Some(started.elapsed()))
                        .await?;
                    report.succeeded += 1;
                    if item.task == SyncTask::RetentionCleanup {
                        self.schedule_next_cleanup().await;
                    }
                }
                Err(error) => match self
                    .queue
                    .mark_attempt_failed(item.id, &error.to_string())
                    .await?
                {
                    FailureOutcome::Abandoned { .. } => report.abandoned += 1,
                    FailureOutcome::Rescheduled { .. } | FailureOutcome::Missing => {
                        report.failed += 1;
                    }
                },
            }
        }

        if report.processed() > 0 {
            tracing::info!(
                "Queue pass: {} succeeded, {} failed, {} abandoned",
                report.succeeded,
                report.failed,
                report.abandoned
            );
        }
        Ok(report)
    }

    /// Poll until `shutdown` changes or its sender is dropped.
    ///
    /// Wake requests from the queue's wake port trigger an immediate pass.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut wakes = self.queue.wake_port().subscribe();
        let mut wake_open = true;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Queue worker started, polling every {:?}", self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                wake = wakes.recv(), if wake_open => match wake {
                    Ok(tag) => tracing::debug!("Woken for {tag}"),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Coalesced {skipped} wake requests");
                    }
                    Err(RecvError::Closed) => wake_open = false,
                },
                _ = shutdown.changed() => break,
            }

            if let Err(error) = self.process_ready().await {
                tracing::error!("Queue pass failed: {error}");
            }
        }
        tracing::info!("Queue worker stopped");
    }

    async fn schedule_next_cleanup(&self) {
        let due = now_ms().saturating_add(duration_ms(self.cleanup_interval));
        match self
            .queue
            .ensure_scheduled(SyncTask::RetentionCleanup, due)
            .await
        {
            Ok(Some(id)) => tracing::debug!("Next retention cleanup is item {id}"),
            Ok(None) => {}
            Err(error) => tracing::warn!("Could not schedule the next retention cleanup: {error}"),
        }
    }

    async fn execute(&self, task: &SyncTask) -> std::result::Result<(), TaskError> {
        match task {
            SyncTask::WasteDocument { ticket_id } => self.waste_document(ticket_id).await,
            SyncTask::RetentionCleanup => {
                self.queue.cleanup_old_events().await?;
                self.conflicts.cleanup_old_conflicts().await?;
                Ok(())
            }
        }
    }

    async fn waste_document(&self, ticket_id: &str) -> std::result::Result<(), TaskError> {
        let Some(ticket) = self.db.get::<WeighTicket>(ticket_id).await? else {
            return Err(TaskError::TicketNotFound(ticket_id.to_string()));
        };
        if ticket.waste_document_id.is_some() {
            tracing::debug!("Ticket {} already has a waste document", ticket.number);
            return Ok(());
        }
        let Some(client) = self.db.get::<Client>(&ticket.client_id).await? else {
            return Err(TaskError::ClientNotFound(ticket.client_id));
        };
        let product = match ticket.product_id.as_deref() {
            Some(id) => self.db.get::<Product>(id).await?,
            None => None,
        };
        let carrier = match ticket.carrier_id.as_deref() {
            Some(id) => self.db.get::<Carrier>(id).await?,
            None => None,
        };

        let Some(documents) = self.documents.as_ref() else {
            return Err(TaskError::RelayNotConfigured);
        };
        let Some(token) = self.token.clone() else {
            return Err(TaskError::TokenNotConfigured);
        };

        let number = ticket.number.clone();
        let request = DocumentRequest {
            ticket,
            client,
            product,
            carrier,
            token,
        };
        let response = documents.create_document(&request).await;
        if !response.success {
            return Err(TaskError::Rejected(
                response
                    .error
                    .unwrap_or_else(|| "document generation failed".to_string()),
            ));
        }
        let Some(document_id) = response.document_id else {
            return Err(TaskError::MissingDocumentId);
        };

        // The ticket may have been edited while the relay was working
        let stamped = self
            .db
            .update::<WeighTicket>(ticket_id, |ticket| {
                ticket.waste_document_id = Some(document_id.clone());
                ticket.version += 1;
                ticket.updated_at = now_ms();
            })
            .await?;
        if stamped.is_none() {
            return Err(TaskError::TicketNotFound(ticket_id.to_string()));
        }

        tracing::info!("Ticket {number} received waste document {document_id}");
        Ok(())
    }
}
