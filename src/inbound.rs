//! Inbound processing pipeline
//!
//! ```text
//! receive(id, type, payload)
//!       │
//!       ▼
//! IdempotencyGuard ── seen before ──▶ Duplicate (no side effects)
//!       │ new: event row + queue row claimed by us
//!       ▼
//! EventHandler (bounded by processing_timeout)
//!       │
//!       ├── ok ─────────────▶ mark_processed + complete      ──▶ Processed
//!       ├── retriable err ──▶ record_failure + reschedule    ──▶ Queued
//!       └── permanent err ──▶ mark_processed(err) + DLQ move ──▶ DeadLettered
//! ```
//!
//! The event is durable before the handler runs: it is captured together with
//! a claimed queue row. If a later storage write fails the caller gets an
//! error, but the row stays queued and the scheduler takes it over once the
//! claim lease runs out, so a redelivery can safely be acknowledged as a
//! duplicate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::dead_letter::DeadLetterRouter;
use crate::error::{Error, Result, StorageError};
use crate::idempotency::IdempotencyGuard;
use crate::metrics::WebhookMetrics;
use crate::model::{DeadLetterItem, RetryQueueItem, RetrySource};
use crate::store::{EventStore, QueueStore};

/// Business logic run once per new inbound event
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Apply the event. Errors other than [`Error::InvalidPayload`] are retried.
    async fn handle(&self, event_type: &str, payload: &serde_json::Value) -> Result<()>;
}

/// What happened to a received event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundOutcome {
    /// Handled on first receipt
    Processed,
    /// Handler failed; queued for retry
    Queued,
    /// Handler failed permanently; dead-lettered
    DeadLettered,
    /// Already seen; nothing done
    Duplicate,
}

impl InboundOutcome {
    /// Whether this delivery was suppressed as a duplicate
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Runs the guard → handler → record pipeline
#[derive(Clone)]
pub struct InboundProcessor {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn QueueStore>,
    guard: IdempotencyGuard<dyn QueueStore>,
    handler: Arc<dyn EventHandler>,
    dead_letters: DeadLetterRouter,
    metrics: Arc<WebhookMetrics>,
    backoff: BackoffPolicy,
    max_retries: u32,
    processing_timeout: Duration,
}

impl InboundProcessor {
    /// Processor over the given stores and handler
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: Arc<dyn EventStore>,
        queue: Arc<dyn QueueStore>,
        handler: Arc<dyn EventHandler>,
        dead_letters: DeadLetterRouter,
        metrics: Arc<WebhookMetrics>,
        backoff: BackoffPolicy,
        max_retries: u32,
        processing_timeout: Duration,
        claim_lease: Duration,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(queue.clone(), claim_lease),
            events,
            queue,
            handler,
            dead_letters,
            metrics,
            backoff,
            max_retries,
            processing_timeout,
        }
    }

    /// Process a verified inbound event at most once.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPayload` for an empty id, `Error::Storage` when the event
    /// could not be captured or its outcome could not be written. In the
    /// second case the event is still queued under this call's claim and is
    /// retried by the scheduler after the lease expires.
    pub async fn receive(
        &self,
        external_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<InboundOutcome> {
        let pending = RetryQueueItem::new(
            external_id,
            RetrySource::Inbound,
            event_type,
            payload.clone(),
            self.max_retries,
            self.backoff.next_retry_at(Utc::now(), 0),
            None,
        );
        let Some(item) = self.guard.check_and_record(pending).await? else {
            info!(event_id = %external_id, event_type = %event_type, "Duplicate event, skipping");
            self.metrics.record_duplicate();
            return Ok(InboundOutcome::Duplicate);
        };
        self.metrics.record_inbound();
        let token = item
            .claim_token
            .ok_or_else(|| StorageError::ClaimLost(item.item_id.to_string()))?;

        let failure = match self.run_handler(event_type, payload).await {
            Ok(()) => {
                self.events.mark_processed(external_id, None).await?;
                self.queue.complete(item.item_id, token).await?;
                info!(event_id = %external_id, event_type = %event_type, "Event processed");
                return Ok(InboundOutcome::Processed);
            }
            Err(e) => e,
        };

        self.metrics.record_inbound_failure();
        let message = failure.to_string();

        if !failure.is_retriable() {
            self.events
                .mark_processed(external_id, Some(&message))
                .await?;
            self.dead_letters.move_item(&item, 0, &message).await?;
            return Ok(InboundOutcome::DeadLettered);
        }

        self.events.record_failure(external_id, &message).await?;
        let next_retry_at = self.backoff.next_retry_at(Utc::now(), 0);
        self.queue
            .reschedule(item.item_id, token, 0, next_retry_at, &message)
            .await?;
        warn!(
            event_id = %external_id,
            event_type = %event_type,
            next_retry_at = %next_retry_at,
            error = %message,
            "Event processing failed, queued for retry"
        );
        Ok(InboundOutcome::Queued)
    }

    /// Re-run the handler for a queued inbound event.
    ///
    /// An event already processed without error is not handled again. That
    /// happens when the first attempt finished but removing its queue row
    /// failed.
    pub async fn retry(&self, item: &RetryQueueItem) -> Result<()> {
        if let Some(event) = self.events.get_event(&item.reference_id).await? {
            if event.processed && event.processing_error.is_none() {
                debug!(event_id = %item.reference_id, "Event already processed, dropping retry");
                return Ok(());
            }
        }

        match self.run_handler(&item.event_type, &item.payload).await {
            Ok(()) => {
                match self.events.mark_processed(&item.reference_id, None).await {
                    Ok(_) => {}
                    Err(StorageError::NotFound(_)) => {
                        warn!(event_id = %item.reference_id, "Retried event has no event record");
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                match self.events.record_failure(&item.reference_id, &message).await {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(storage) => return Err(storage.into()),
                }
                Err(e)
            }
        }
    }

    /// Terminal marking once an inbound item is dead-lettered
    pub async fn on_dead_letter(&self, dead: &DeadLetterItem) -> Result<()> {
        match self
            .events
            .mark_processed(&dead.reference_id, Some(&dead.final_error))
            .await
        {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn run_handler(&self, event_type: &str, payload: &serde_json::Value) -> Result<()> {
        debug!(event_type = %event_type, "Running event handler");
        match tokio::time::timeout(
            self.processing_timeout,
            self.handler.handle(event_type, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::ProcessingFailed(format!(
                "processing timed out after {}ms",
                self.processing_timeout.as_millis()
            ))),
        }
    }
}
