//! Idempotency guard for inbound events
//!
//! ```text
//! check_and_record(pending) ──▶ insert event row + claimed queue row
//!                                         │
//!                   ┌─────────────────────┼────────────────┐
//!                   ▼                     ▼                ▼
//!               inserted             DuplicateKey     other error
//!         Some(claimed item)            None         Err (fail closed)
//! ```
//!
//! The insert itself is the check, so two concurrent deliveries of the same
//! event cannot both observe "not found": the storage layer's uniqueness on
//! `external_id` decides the single winner.
//!
//! The event row never exists without a queue row, a dead letter or
//! `processed = true`. The winner holds the queue row's claim while it runs
//! the handler; if it dies or its storage writes fail, the scheduler retries
//! the event once the lease expires. A redelivery that sees the row is
//! therefore always safe to acknowledge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error};

use crate::error::{Error, Result, StorageError};
use crate::model::{InboundEvent, RetryQueueItem};
use crate::store::QueueStore;

/// Detects and suppresses duplicate inbound deliveries
pub struct IdempotencyGuard<S: QueueStore + ?Sized> {
    store: Arc<S>,
    lease: Duration,
}

impl<S: QueueStore + ?Sized> Clone for IdempotencyGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lease: self.lease,
        }
    }
}

impl<S: QueueStore + ?Sized> IdempotencyGuard<S> {
    /// Guard backed by `store`; the winner holds its claim for `lease`
    pub fn new(store: Arc<S>, lease: Duration) -> Self {
        Self { store, lease }
    }

    /// Record the event if it has never been seen.
    ///
    /// `pending` is the queue row the event falls back to if its first
    /// attempt does not finish. Returns the claimed row exactly once per
    /// `reference_id`; the caller owns the side effects for that event and
    /// must complete, reschedule or dead-letter the row. `None` means another
    /// delivery already captured it and the caller must skip side effects.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPayload` for an empty id, `Error::Storage` when the store
    /// fails. On any error the caller must not run business logic.
    pub async fn check_and_record(&self, pending: RetryQueueItem) -> Result<Option<RetryQueueItem>> {
        let external_id = pending.reference_id.clone();
        if external_id.trim().is_empty() {
            return Err(Error::InvalidPayload("empty external event id".to_string()));
        }

        let event = InboundEvent::new(
            external_id.as_str(),
            pending.event_type.as_str(),
            pending.payload.clone(),
        );
        match self
            .store
            .capture_inbound(event, pending, Utc::now(), self.lease)
            .await
        {
            Ok(claimed) => {
                debug!(event_id = %external_id, event_type = %claimed.event_type, "Recorded new inbound event");
                Ok(Some(claimed))
            }
            Err(StorageError::DuplicateKey(_)) => {
                debug!(event_id = %external_id, "Duplicate inbound event suppressed");
                Ok(None)
            }
            Err(e) => {
                error!(event_id = %external_id, error = %e, "Idempotency check failed");
                Err(Error::Storage(e))
            }
        }
    }
}
