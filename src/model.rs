//! Persisted records
//!
//! Three logical tables (inbound events, retry queue, dead-letter queue) plus the
//! append-only delivery attempt log and the read-only subscription directory.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event received from an upstream provider, keyed by its external id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Provider-assigned identifier; the idempotency key
    pub external_id: String,
    /// Discriminator such as `customer.subscription.updated`
    pub event_type: String,
    /// Raw body, stored verbatim for replay and audit
    pub payload: serde_json::Value,
    /// Reached a terminal outcome (success, or dead-lettered with an error)
    pub processed: bool,
    /// Last processing error, if any
    pub processing_error: Option<String>,
    /// Number of processing attempts recorded
    pub attempts: u32,
    /// When the event was first received
    pub received_at: DateTime<Utc>,
    /// When the event reached its terminal outcome
    pub processed_at: Option<DateTime<Utc>>,
}

impl InboundEvent {
    /// A freshly received, unprocessed event
    pub fn new(
        external_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            event_type: event_type.into(),
            payload,
            processed: false,
            processing_error: None,
            attempts: 0,
            received_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Which pipeline a queued retry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrySource {
    /// Re-run the business handler for an inbound event
    Inbound,
    /// Re-POST a delivery to a subscriber
    Outbound {
        /// Target subscription
        subscription_id: Uuid,
    },
}

impl RetrySource {
    /// Metric and log label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound { .. } => "outbound",
        }
    }
}

/// A failed item waiting for its next attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryQueueItem {
    /// Queue row id
    pub item_id: Uuid,
    /// External event id (inbound) or delivery id (outbound); unique in the queue
    pub reference_id: String,
    /// Pipeline the item is replayed through
    pub source: RetrySource,
    /// Event type, kept for replay without re-fetching
    pub event_type: String,
    /// Payload, kept for replay without re-fetching
    pub payload: serde_json::Value,
    /// Failed retries so far
    pub retry_count: u32,
    /// Budget; reaching it moves the item to the dead-letter queue
    pub max_retries: u32,
    /// Earliest time the item may be claimed again
    pub next_retry_at: DateTime<Utc>,
    /// Most recent failure
    pub last_error: Option<String>,
    /// When the first failure was queued
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Token of the scheduler run currently holding the item
    pub claim_token: Option<Uuid>,
    /// Claim expiry; after it passes the item is reclaimable
    pub claimed_until: Option<DateTime<Utc>>,
}

impl RetryQueueItem {
    /// Queue entry for a first failure
    pub fn new(
        reference_id: impl Into<String>,
        source: RetrySource,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        next_retry_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            item_id: Uuid::new_v4(),
            reference_id: reference_id.into(),
            source,
            event_type: event_type.into(),
            payload,
            retry_count: 0,
            max_retries,
            next_retry_at,
            last_error,
            created_at: now,
            updated_at: now,
            claim_token: None,
            claimed_until: None,
        }
    }

    /// Whether a further failure at this count exhausts the budget
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Due and not held by a live claim
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
            && !self.is_exhausted()
            && self.claimed_until.map_or(true, |until| until <= now)
    }
}

/// A retry item that ran out of budget; write-once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    /// Dead-letter row id
    pub dead_letter_id: Uuid,
    /// Id the item had in the retry queue
    pub item_id: Uuid,
    /// External event id or delivery id
    pub reference_id: String,
    /// Pipeline the item came from
    pub source: RetrySource,
    /// Event type
    pub event_type: String,
    /// Payload
    pub payload: serde_json::Value,
    /// Retries made before giving up
    pub retry_count: u32,
    /// Budget the item had
    pub max_retries: u32,
    /// When the item first entered the retry queue
    pub original_timestamp: DateTime<Utc>,
    /// Error of the final attempt
    pub final_error: String,
    /// When the move happened
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterItem {
    /// Build the dead-letter record for an exhausted queue item
    pub fn from_retry(
        item: &RetryQueueItem,
        final_error: impl Into<String>,
        moved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dead_letter_id: Uuid::new_v4(),
            item_id: item.item_id,
            reference_id: item.reference_id.clone(),
            source: item.source,
            event_type: item.event_type.clone(),
            payload: item.payload.clone(),
            retry_count: item.retry_count,
            max_retries: item.max_retries,
            original_timestamp: item.created_at,
            final_error: final_error.into(),
            moved_at,
        }
    }
}

/// A subscriber endpoint for outbound events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSubscription {
    /// Subscription id
    pub subscription_id: Uuid,
    /// Endpoint receiving POSTs
    pub target_url: String,
    /// HMAC signing secret
    #[serde(skip_serializing)]
    pub secret: String,
    /// Event types delivered to this endpoint
    pub subscribed_event_types: BTreeSet<String>,
    /// Inactive subscriptions receive nothing
    pub active: bool,
}

impl OutboundSubscription {
    /// Active subscription for the given event types
    pub fn new<I, S>(target_url: impl Into<String>, secret: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscription_id: Uuid::new_v4(),
            target_url: target_url.into(),
            secret: secret.into(),
            subscribed_event_types: events.into_iter().map(Into::into).collect(),
            active: true,
        }
    }

    /// Whether this subscription should receive `event_type`
    pub fn wants(&self, event_type: &str) -> bool {
        self.active && self.subscribed_event_types.contains(event_type)
    }
}

/// An internal domain event to fan out to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Event id
    pub event_id: Uuid,
    /// Event type such as `clip.approved`
    pub event_type: String,
    /// Event data
    pub data: serde_json::Value,
    /// When the event happened
    pub occurred_at: DateTime<Utc>,
}

impl OutboundEvent {
    /// New event occurring now
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            occurred_at: Utc::now(),
        }
    }

    /// Body POSTed to subscribers
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.event_type,
            "event_id": self.event_id,
            "timestamp": self.occurred_at,
            "data": self.data,
        })
    }
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// 2xx
    Success,
    /// Anything else; see [`FailureKind`]
    Failure,
}

/// Why a delivery attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No response within the delivery timeout
    Timeout,
    /// Connection or transport error
    Network,
    /// Non-2xx response
    HttpStatus,
    /// Refused locally (inactive subscription, disallowed target)
    Rejected,
}

/// Append-only audit record of a delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttemptRecord {
    /// Attempt id
    pub attempt_id: Uuid,
    /// Subscription delivered to
    pub subscription_id: Uuid,
    /// Domain event id
    pub event_id: Uuid,
    /// Delivery id (stable across retries of the same delivery)
    pub delivery_id: Uuid,
    /// Response status, if a response arrived
    pub http_status: Option<u16>,
    /// Wall time of the attempt
    pub latency_ms: u64,
    /// Success or failure
    pub outcome: DeliveryOutcome,
    /// Failure classification
    pub failure: Option<FailureKind>,
    /// Error message or truncated response body
    pub error: Option<String>,
    /// When the attempt started
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttemptRecord {
    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        self.outcome == DeliveryOutcome::Success
    }
}
