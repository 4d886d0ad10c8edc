//! Storage seams
//!
//! Three traits split ownership the same way the tables are split:
//!
//! - [`EventStore`]: inbound events and the delivery attempt log (append/update
//!   only, no deletes)
//! - [`QueueStore`]: retry queue and dead-letter queue; the only place queue
//!   rows are created, claimed, moved or deleted
//! - [`SubscriptionStore`]: read-only view of outbound subscriptions
//!
//! Claims are leases: [`QueueStore::claim_due`] stamps each returned item with a
//! fresh `claim_token` and a `claimed_until` deadline. Every follow-up mutation
//! must present that token, so a scheduler whose lease was taken over cannot
//! touch the item again. A SQL engine implements `claim_due` with
//! `SELECT ... FOR UPDATE SKIP LOCKED` followed by the lease update.

mod memory;

pub use memory::InMemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::model::{
    DeadLetterItem, DeliveryAttemptRecord, InboundEvent, OutboundSubscription, RetryQueueItem,
};

/// Delivery counts over a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// 2xx attempts
    pub success: u64,
    /// Failed attempts other than timeouts
    pub failure: u64,
    /// Attempts that timed out
    pub timeout: u64,
}

impl DeliveryStats {
    /// Total attempts
    pub fn total(&self) -> u64 {
        self.success + self.failure + self.timeout
    }

    /// Fraction of attempts that succeeded, `None` with no attempts
    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success as f64 / total as f64),
        }
    }
}

/// Inbound events and delivery attempt records
#[async_trait::async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Insert a new event; `DuplicateKey` if the external id exists
    async fn insert_event(&self, event: InboundEvent) -> StorageResult<()>;

    /// Terminal marking: `processed = true`, error recorded, attempts incremented
    async fn mark_processed(
        &self,
        external_id: &str,
        error: Option<&str>,
    ) -> StorageResult<InboundEvent>;

    /// Record a failed attempt without reaching a terminal outcome
    async fn record_failure(&self, external_id: &str, error: &str) -> StorageResult<()>;

    /// Look up an event
    async fn get_event(&self, external_id: &str) -> StorageResult<Option<InboundEvent>>;

    /// Append to the attempt log
    async fn append_attempt(&self, record: DeliveryAttemptRecord) -> StorageResult<()>;

    /// Attempts made for one delivery, oldest first
    async fn attempts_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> StorageResult<Vec<DeliveryAttemptRecord>>;

    /// Outcome counts for attempts at or after `since`
    async fn delivery_stats_since(&self, since: DateTime<Utc>) -> StorageResult<DeliveryStats>;
}

/// Retry queue and dead-letter queue
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Queue a first failure; `false` if the reference is already queued
    async fn enqueue(&self, item: RetryQueueItem) -> StorageResult<bool>;

    /// Insert a new inbound event together with its queue row, already claimed
    /// by the caller for `lease`, in one transaction. The event is durable from
    /// here on: if the caller never finishes, the scheduler picks the row up
    /// once the lease runs out. `DuplicateKey` if the event id exists or the
    /// reference is already queued.
    async fn capture_inbound(
        &self,
        event: InboundEvent,
        item: RetryQueueItem,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StorageResult<RetryQueueItem>;

    /// Claim up to `limit` due items, oldest `next_retry_at` first
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> StorageResult<Vec<RetryQueueItem>>;

    /// Extend a claim to `now + lease` right before working the item.
    /// `ClaimLost` if another scheduler took the item over.
    async fn renew_claim(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StorageResult<DateTime<Utc>>;

    /// Delete a claimed item after success
    async fn complete(&self, item_id: Uuid, claim_token: Uuid) -> StorageResult<()>;

    /// Record a retriable failure and release the claim
    async fn reschedule(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> StorageResult<()>;

    /// Atomically insert the dead-letter record and delete the queue row
    async fn move_to_dead_letter(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        retry_count: u32,
        final_error: &str,
        moved_at: DateTime<Utc>,
    ) -> StorageResult<DeadLetterItem>;

    /// Record a dead letter for an item that was never queued (first attempt
    /// failed non-retriably); `DuplicateKey` if the id exists
    async fn insert_dead_letter(&self, item: DeadLetterItem) -> StorageResult<()>;

    /// Queue row for a reference, if any
    async fn get_queued(&self, reference_id: &str) -> StorageResult<Option<RetryQueueItem>>;

    /// Items still in the retry queue
    async fn count_queued(&self) -> StorageResult<u64>;

    /// Dead letters, newest first
    async fn list_dead_letters(
        &self,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<DeadLetterItem>>;

    /// One dead letter
    async fn get_dead_letter(&self, dead_letter_id: Uuid)
        -> StorageResult<Option<DeadLetterItem>>;

    /// Items in the dead-letter queue
    async fn count_dead_letters(&self) -> StorageResult<u64>;

    /// Queue a fresh copy of a dead letter (`retry_count = 0`, due at `now`).
    /// The dead letter itself is left untouched.
    async fn requeue_dead_letter(
        &self,
        dead_letter_id: Uuid,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<RetryQueueItem>;
}

/// Outbound subscriptions, read-only for delivery
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// One subscription
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> StorageResult<Option<OutboundSubscription>>;

    /// Active subscriptions that want `event_type`
    async fn subscriptions_for(&self, event_type: &str) -> StorageResult<Vec<OutboundSubscription>>;
}
