//! Retry scheduler
//!
//! A single background task per process that periodically claims due items
//! from the retry queue and re-attempts them.
//!
//! ```text
//!            ┌───────────── every scan_interval ─────────────┐
//!            ▼                                               │
//!   claim_due(now, batch_size, lease)                        │
//!            │                                               │
//!            ▼  for_each_concurrent(workers)                 │
//!   ┌────────────────────┐                                   │
//!   │ RetryHandler::retry│                                   │
//!   └─────────┬──────────┘                                   │
//!     ok      │      err                                     │
//!     ▼       ▼                                              │
//!  complete  retry_count + 1 >= max_retries ?                │
//!            ├── yes ──▶ DeadLetterRouter::move_item         │
//!            └── no  ──▶ reschedule(now + delay(count))  ────┘
//! ```
//!
//! Claims are leases. A batch is claimed in one go but worked through a
//! bounded pool, so each item's lease is renewed right before its handler
//! runs; an item whose lease lapsed while it waited and was taken over by
//! another scheduler is skipped. Every follow-up write presents the claim
//! token, and an item left claimed by a crashed process becomes claimable
//! again once its lease runs out.
//!
//! Per-item failures are isolated: a storage error on one item is logged and
//! the rest of the batch carries on. The item keeps its claim until the lease
//! expires, then gets picked up again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::WebhookConfig;
use crate::dead_letter::DeadLetterRouter;
use crate::error::{Error, Result, StorageError};
use crate::metrics::WebhookMetrics;
use crate::model::{DeadLetterItem, RetryQueueItem};
use crate::store::QueueStore;

/// Re-processing callback invoked for each claimed item
#[async_trait]
pub trait RetryHandler: Send + Sync + 'static {
    /// Re-attempt the item. An error counts as a failed attempt;
    /// non-retriable errors (see [`Error::is_retriable`]) dead-letter at once.
    async fn retry(&self, item: &RetryQueueItem) -> Result<()>;

    /// Called after the item was moved to the dead-letter queue
    async fn on_dead_letter(&self, _dead: &DeadLetterItem) -> Result<()> {
        Ok(())
    }
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scans
    pub scan_interval: Duration,
    /// Max items claimed per scan
    pub batch_size: usize,
    /// Max items processed concurrently within a batch
    pub workers: usize,
    /// Claim lease length
    pub claim_lease: Duration,
    /// Delay policy for rescheduled items
    pub backoff: BackoffPolicy,
}

impl From<&WebhookConfig> for SchedulerConfig {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            scan_interval: config.scan_interval,
            batch_size: config.batch_size,
            workers: config.workers,
            claim_lease: config.claim_lease,
            backoff: config.backoff(),
        }
    }
}

/// What one scan did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Items claimed
    pub claimed: usize,
    /// Retries that succeeded and were removed
    pub succeeded: usize,
    /// Failures rescheduled with backoff
    pub rescheduled: usize,
    /// Items moved to the dead-letter queue
    pub dead_lettered: usize,
    /// Items whose follow-up storage write failed
    pub errors: usize,
    /// Items taken over by another scheduler before they ran
    pub skipped: usize,
}

impl TickReport {
    fn add(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Rescheduled => self.rescheduled += 1,
            ItemOutcome::DeadLettered => self.dead_lettered += 1,
            ItemOutcome::StorageFailed => self.errors += 1,
            ItemOutcome::LeaseLost => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ItemOutcome {
    Succeeded,
    Rescheduled,
    DeadLettered,
    StorageFailed,
    LeaseLost,
}

/// Periodic retry driver
pub struct RetryScheduler {
    queue: Arc<dyn QueueStore>,
    handler: Arc<dyn RetryHandler>,
    dead_letters: DeadLetterRouter,
    metrics: Arc<WebhookMetrics>,
    config: SchedulerConfig,
}

impl RetryScheduler {
    /// Scheduler draining `queue` through `handler`
    pub fn new(
        queue: Arc<dyn QueueStore>,
        handler: Arc<dyn RetryHandler>,
        dead_letters: DeadLetterRouter,
        metrics: Arc<WebhookMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            dead_letters,
            metrics,
            config,
        }
    }

    /// Scheduler settings
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One scan at the current time
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// One scan treating `now` as the current time.
    ///
    /// Fails only if the claim query itself fails; per-item problems are
    /// counted in [`TickReport::errors`].
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let items = self
            .queue
            .claim_due(now, self.config.batch_size, self.config.claim_lease)
            .await?;

        let mut report = TickReport {
            claimed: items.len(),
            ..TickReport::default()
        };
        if items.is_empty() {
            debug!("Retry scan found no due items");
            return Ok(report);
        }

        let started = Instant::now();
        let outcomes = Mutex::new(Vec::with_capacity(items.len()));
        futures::stream::iter(items)
            .for_each_concurrent(self.config.workers.max(1), |item| {
                let outcomes = &outcomes;
                async move {
                    let outcome = self.process_item(item, now, started).await;
                    outcomes.lock().push(outcome);
                }
            })
            .await;

        for outcome in outcomes.into_inner() {
            report.add(outcome);
        }
        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            rescheduled = report.rescheduled,
            dead_lettered = report.dead_lettered,
            errors = report.errors,
            skipped = report.skipped,
            "Retry scan complete"
        );
        Ok(report)
    }

    async fn process_item(
        &self,
        mut item: RetryQueueItem,
        now: DateTime<Utc>,
        started: Instant,
    ) -> ItemOutcome {
        let Some(token) = item.claim_token else {
            error!(item_id = %item.item_id, "Claimed item has no claim token");
            return ItemOutcome::StorageFailed;
        };

        // `now` is the scan time; items wait in the pool after it
        let waited = chrono::Duration::from_std(started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        match self
            .queue
            .renew_claim(item.item_id, token, now + waited, self.config.claim_lease)
            .await
        {
            Ok(until) => item.claimed_until = Some(until),
            Err(StorageError::ClaimLost(_) | StorageError::NotFound(_)) => {
                warn!(
                    item_id = %item.item_id,
                    reference_id = %item.reference_id,
                    "Lease lapsed before retry, item taken over"
                );
                return ItemOutcome::LeaseLost;
            }
            Err(e) => {
                error!(item_id = %item.item_id, error = %e, "Failed to renew claim");
                return ItemOutcome::StorageFailed;
            }
        }

        debug!(
            item_id = %item.item_id,
            reference_id = %item.reference_id,
            attempt = item.retry_count + 1,
            "Retrying item"
        );

        let result = self.handler.retry(&item).await;
        self.metrics.record_retry(item.source, result.is_ok());

        let failure = match result {
            Ok(()) => {
                return match self.queue.complete(item.item_id, token).await {
                    Ok(()) => {
                        info!(reference_id = %item.reference_id, "Retry succeeded");
                        ItemOutcome::Succeeded
                    }
                    Err(e) => {
                        error!(item_id = %item.item_id, error = %e, "Failed to remove retried item");
                        ItemOutcome::StorageFailed
                    }
                };
            }
            Err(e) => e,
        };

        let retry_count = item.retry_count.saturating_add(1);
        let message = failure.to_string();

        if matches!(failure, Error::Storage(_)) {
            // Leave the claim in place; the lease expiry makes it reclaimable
            error!(
                item_id = %item.item_id,
                reference_id = %item.reference_id,
                error = %message,
                "Storage failure during retry"
            );
            return ItemOutcome::StorageFailed;
        }

        if !failure.is_retriable() || retry_count >= item.max_retries {
            return self.dead_letter(&item, retry_count, &message).await;
        }

        let next_retry_at = self.config.backoff.next_retry_at(now, retry_count);
        match self
            .queue
            .reschedule(item.item_id, token, retry_count, next_retry_at, &message)
            .await
        {
            Ok(()) => {
                warn!(
                    reference_id = %item.reference_id,
                    retry_count,
                    max_retries = item.max_retries,
                    next_retry_at = %next_retry_at,
                    error = %message,
                    "Retry failed, rescheduled"
                );
                ItemOutcome::Rescheduled
            }
            Err(e) => {
                error!(item_id = %item.item_id, error = %e, "Failed to reschedule item");
                ItemOutcome::StorageFailed
            }
        }
    }

    async fn dead_letter(
        &self,
        item: &RetryQueueItem,
        retry_count: u32,
        final_error: &str,
    ) -> ItemOutcome {
        let dead = match self.dead_letters.move_item(item, retry_count, final_error).await {
            Ok(dead) => dead,
            Err(e) => {
                error!(item_id = %item.item_id, error = %e, "Failed to move item to dead-letter queue");
                return ItemOutcome::StorageFailed;
            }
        };
        if let Err(e) = self.handler.on_dead_letter(&dead).await {
            error!(
                dead_letter_id = %dead.dead_letter_id,
                error = %e,
                "Dead-letter callback failed"
            );
        }
        ItemOutcome::DeadLettered
    }

    /// Spawn the periodic loop; stop it through the returned handle
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let token = CancellationToken::new();
        let join = tokio::spawn(self.run(token.clone()));
        SchedulerHandle { token, join }
    }

    /// Scan every `scan_interval` until `shutdown` fires.
    ///
    /// Cancellation is only observed between scans, so a batch in progress
    /// always finishes its follow-up writes.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            workers = self.config.workers,
            "Retry scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Retry scan failed");
                    }
                }
            }
        }

        info!("Retry scheduler stopped");
    }
}

/// Owner of a running scheduler loop
#[derive(Debug)]
pub struct SchedulerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Token that stops the loop when cancelled
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop scanning and wait for the current batch to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Retry scheduler task panicked");
        }
    }
}
