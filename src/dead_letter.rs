//! Dead-letter router
//!
//! Items that spend their retry budget (or fail non-retriably) land here. The
//! move is a single storage operation that inserts the [`DeadLetterItem`] and
//! deletes the queue row together. Nothing is replayed automatically; replay is
//! an operator action that queues a fresh copy with `retry_count = 0`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::metrics::WebhookMetrics;
use crate::model::{DeadLetterItem, RetryQueueItem, RetrySource};
use crate::store::QueueStore;

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on a single listing
pub const MAX_LIST_LIMIT: usize = 500;

/// Moves exhausted items out of the retry queue and serves them to operators
#[derive(Clone)]
pub struct DeadLetterRouter {
    queue: Arc<dyn QueueStore>,
    metrics: Arc<WebhookMetrics>,
    inbound_max_retries: u32,
    outbound_max_retries: u32,
}

impl DeadLetterRouter {
    /// Router over `queue`; budgets are used for replays
    pub fn new(
        queue: Arc<dyn QueueStore>,
        metrics: Arc<WebhookMetrics>,
        inbound_max_retries: u32,
        outbound_max_retries: u32,
    ) -> Self {
        Self {
            queue,
            metrics,
            inbound_max_retries,
            outbound_max_retries,
        }
    }

    /// Move a claimed item to the dead-letter queue.
    ///
    /// `retry_count` is the count including the failure that exhausted it.
    pub async fn move_item(
        &self,
        item: &RetryQueueItem,
        retry_count: u32,
        final_error: &str,
    ) -> Result<DeadLetterItem> {
        let token = item
            .claim_token
            .ok_or_else(|| StorageError::ClaimLost(item.item_id.to_string()))?;

        let dead = self
            .queue
            .move_to_dead_letter(item.item_id, token, retry_count, final_error, Utc::now())
            .await?;

        warn!(
            reference_id = %dead.reference_id,
            dead_letter_id = %dead.dead_letter_id,
            source = dead.source.label(),
            event_type = %dead.event_type,
            retry_count = dead.retry_count,
            error = %final_error,
            "Moved item to dead-letter queue"
        );
        self.metrics.record_dead_letter(dead.source);
        Ok(dead)
    }

    /// Dead-letter an item whose first attempt failed non-retriably, without
    /// ever queueing it
    pub async fn bury(&self, item: &RetryQueueItem, final_error: &str) -> Result<DeadLetterItem> {
        let dead = DeadLetterItem::from_retry(item, final_error, Utc::now());
        self.queue.insert_dead_letter(dead.clone()).await?;

        warn!(
            reference_id = %dead.reference_id,
            dead_letter_id = %dead.dead_letter_id,
            source = dead.source.label(),
            event_type = %dead.event_type,
            error = %final_error,
            "First attempt failed permanently, dead-lettered"
        );
        self.metrics.record_dead_letter(dead.source);
        Ok(dead)
    }

    /// Newest dead letters first, capped at [`MAX_LIST_LIMIT`]
    pub async fn list(&self, limit: usize) -> Result<Vec<DeadLetterItem>> {
        self.list_page(limit, 0).await
    }

    /// One page of dead letters
    pub async fn list_page(&self, limit: usize, offset: usize) -> Result<Vec<DeadLetterItem>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        Ok(self.queue.list_dead_letters(limit, offset).await?)
    }

    /// One dead letter
    pub async fn get(&self, dead_letter_id: Uuid) -> Result<Option<DeadLetterItem>> {
        Ok(self.queue.get_dead_letter(dead_letter_id).await?)
    }

    /// Items in the dead-letter queue
    pub async fn count(&self) -> Result<u64> {
        Ok(self.queue.count_dead_letters().await?)
    }

    /// Queue a fresh retry for a dead letter, due immediately.
    ///
    /// Fails with `StorageError::NotFound` for an unknown id and
    /// `StorageError::DuplicateKey` if the reference is already queued.
    pub async fn replay(&self, dead_letter_id: Uuid) -> Result<RetryQueueItem> {
        let dead = self
            .queue
            .get_dead_letter(dead_letter_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(dead_letter_id.to_string()))?;

        let budget = match dead.source {
            RetrySource::Inbound => self.inbound_max_retries,
            RetrySource::Outbound { .. } => self.outbound_max_retries,
        };
        let item = self
            .queue
            .requeue_dead_letter(dead_letter_id, budget, Utc::now())
            .await?;

        info!(
            dead_letter_id = %dead_letter_id,
            reference_id = %item.reference_id,
            item_id = %item.item_id,
            max_retries = budget,
            "Replayed dead letter"
        );
        self.metrics.record_replay();
        Ok(item)
    }
}
