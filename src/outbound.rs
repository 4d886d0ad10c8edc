//! Outbound fan-out
//!
//! [`OutboundDispatcher::trigger`] delivers a domain event to every active
//! subscription that asked for its type. Each subscription gets its own
//! [`Delivery`] with a stable delivery id; a retriable failure queues that
//! delivery for the scheduler, a permanent one goes straight to the
//! dead-letter queue.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::dead_letter::DeadLetterRouter;
use crate::delivery::{validate_target_url, Delivery, DeliveryExecutor};
use crate::error::{Error, Result};
use crate::model::{OutboundEvent, OutboundSubscription, RetryQueueItem, RetrySource};
use crate::signature::generate_secret;
use crate::store::{QueueStore, SubscriptionStore};

/// Event types subscribers can register for
pub const SUPPORTED_EVENTS: &[&str] = &["clip.submitted", "clip.approved", "clip.rejected"];

/// Whether `event_type` is one subscribers can register for
pub fn is_supported_event(event_type: &str) -> bool {
    SUPPORTED_EVENTS.contains(&event_type)
}

/// Build an active subscription with a freshly generated signing secret.
///
/// # Errors
///
/// `Error::InvalidPayload` when the target is not an allowed http(s) URL, the
/// event list is empty, or it names an unsupported event type.
pub fn register_subscription<I, S>(
    target_url: &str,
    events: I,
    allow_private_targets: bool,
) -> Result<OutboundSubscription>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    validate_target_url(target_url, allow_private_targets).map_err(Error::InvalidPayload)?;

    let events: Vec<String> = events.into_iter().map(Into::into).collect();
    if events.is_empty() {
        return Err(Error::InvalidPayload(
            "at least one event type is required".to_string(),
        ));
    }
    if let Some(unsupported) = events.iter().find(|e| !is_supported_event(e)) {
        return Err(Error::InvalidPayload(format!(
            "unsupported event type: {unsupported}"
        )));
    }

    Ok(OutboundSubscription::new(target_url, generate_secret(), events))
}

/// What one fan-out did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Subscriptions matching the event type
    pub matched: usize,
    /// Delivered on the first attempt
    pub delivered: usize,
    /// Queued for retry
    pub queued: usize,
    /// Failed permanently on the first attempt
    pub dead_lettered: usize,
    /// Subscriptions whose outcome could not be persisted
    pub errors: usize,
}

/// Fans domain events out to subscribers
#[derive(Clone)]
pub struct OutboundDispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    queue: Arc<dyn QueueStore>,
    executor: DeliveryExecutor,
    dead_letters: DeadLetterRouter,
    backoff: BackoffPolicy,
    max_retries: u32,
}

impl OutboundDispatcher {
    /// Dispatcher queueing failures with `max_retries` attempts
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        queue: Arc<dyn QueueStore>,
        executor: DeliveryExecutor,
        dead_letters: DeadLetterRouter,
        backoff: BackoffPolicy,
        max_retries: u32,
    ) -> Self {
        Self {
            subscriptions,
            queue,
            executor,
            dead_letters,
            backoff,
            max_retries,
        }
    }

    /// Deliver `event` to every matching subscription.
    ///
    /// Subscriptions are handled independently; a storage failure for one is
    /// logged and counted, and the rest still get their delivery.
    ///
    /// # Errors
    ///
    /// Fails only if the subscription lookup itself fails.
    pub async fn trigger(&self, event: &OutboundEvent) -> Result<DispatchReport> {
        let subscriptions = self.subscriptions.subscriptions_for(&event.event_type).await?;
        let mut report = DispatchReport {
            matched: subscriptions.len(),
            ..DispatchReport::default()
        };

        if subscriptions.is_empty() {
            debug!(event_type = %event.event_type, "No subscriptions for event");
            return Ok(report);
        }

        for subscription in &subscriptions {
            match self.dispatch_one(subscription, event).await {
                Ok(Dispatched::Delivered) => report.delivered += 1,
                Ok(Dispatched::Queued) => report.queued += 1,
                Ok(Dispatched::DeadLettered) => report.dead_lettered += 1,
                Err(e) => {
                    error!(
                        subscription_id = %subscription.subscription_id,
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to dispatch webhook"
                    );
                    report.errors += 1;
                }
            }
        }

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            matched = report.matched,
            delivered = report.delivered,
            queued = report.queued,
            dead_lettered = report.dead_lettered,
            "Dispatched outbound event"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        subscription: &OutboundSubscription,
        event: &OutboundEvent,
    ) -> Result<Dispatched> {
        let delivery = Delivery::for_event(event);
        let record = self.executor.deliver(subscription, &delivery).await;
        let Some(failure) = self.executor.policy().classify(&record) else {
            return Ok(Dispatched::Delivered);
        };

        let item = RetryQueueItem::new(
            delivery.delivery_id.to_string(),
            RetrySource::Outbound {
                subscription_id: subscription.subscription_id,
            },
            delivery.event_type.clone(),
            delivery.payload.clone(),
            self.max_retries,
            self.backoff.next_retry_at(Utc::now(), 0),
            Some(failure.to_string()),
        );

        if !failure.is_retriable() {
            self.dead_letters.bury(&item, &failure.to_string()).await?;
            return Ok(Dispatched::DeadLettered);
        }

        self.queue.enqueue(item).await?;
        debug!(
            delivery_id = %delivery.delivery_id,
            subscription_id = %subscription.subscription_id,
            "Queued failed delivery for retry"
        );
        Ok(Dispatched::Queued)
    }

    /// Re-attempt a queued delivery to `subscription_id`
    pub async fn retry(&self, item: &RetryQueueItem, subscription_id: Uuid) -> Result<()> {
        let subscription = self
            .subscriptions
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                Error::DeliveryRejected(format!("subscription {subscription_id} no longer exists"))
            })?;
        let delivery = Delivery::from_retry(item)?;
        self.executor
            .deliver_checked(&subscription, &delivery)
            .await
            .map(|_| ())
    }
}

enum Dispatched {
    Delivered,
    Queued,
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;
    use crate::delivery::DeliveryPolicy;
    use crate::error::{StorageError, StorageResult};
    use crate::metrics::WebhookMetrics;
    use crate::model::{DeliveryAttemptRecord, InboundEvent};
    use crate::store::{DeliveryStats, EventStore, InMemoryStore};
    use chrono::DateTime;

    /// Event store whose attempt log is down
    struct AuditOutage(Arc<InMemoryStore>);

    #[async_trait::async_trait]
    impl EventStore for AuditOutage {
        async fn insert_event(&self, event: InboundEvent) -> StorageResult<()> {
            self.0.insert_event(event).await
        }
        async fn mark_processed(
            &self,
            external_id: &str,
            error: Option<&str>,
        ) -> StorageResult<InboundEvent> {
            self.0.mark_processed(external_id, error).await
        }
        async fn record_failure(&self, external_id: &str, error: &str) -> StorageResult<()> {
            self.0.record_failure(external_id, error).await
        }
        async fn get_event(&self, external_id: &str) -> StorageResult<Option<InboundEvent>> {
            self.0.get_event(external_id).await
        }
        async fn append_attempt(&self, _record: DeliveryAttemptRecord) -> StorageResult<()> {
            Err(StorageError::Backend("attempt log unavailable".to_string()))
        }
        async fn attempts_for_delivery(
            &self,
            delivery_id: Uuid,
        ) -> StorageResult<Vec<DeliveryAttemptRecord>> {
            self.0.attempts_for_delivery(delivery_id).await
        }
        async fn delivery_stats_since(&self, since: DateTime<Utc>) -> StorageResult<DeliveryStats> {
            self.0.delivery_stats_since(since).await
        }
    }

    #[tokio::test]
    async fn test_failed_delivery_is_queued_when_attempt_log_is_down() {
        let store = Arc::new(InMemoryStore::new());
        let config = WebhookConfig {
            allow_private_targets: true,
            ..WebhookConfig::test_config()
        };
        let metrics = Arc::new(WebhookMetrics::new());
        let executor = DeliveryExecutor::new(
            Arc::new(AuditOutage(store.clone())),
            metrics.clone(),
            DeliveryPolicy::from(&config),
        )
        .unwrap();
        let dispatcher = OutboundDispatcher::new(
            store.clone(),
            store.clone(),
            executor,
            DeadLetterRouter::new(store.clone(), metrics, 3, 5),
            config.backoff(),
            5,
        );
        // Nothing listens on the discard port
        store.upsert_subscription(OutboundSubscription::new(
            "http://127.0.0.1:9/hook",
            "secret",
            ["clip.approved"],
        ));

        let event = OutboundEvent::new("clip.approved", serde_json::json!({"clip_id": "c1"}));
        let report = dispatcher.trigger(&event).await.unwrap();

        assert_eq!(report.queued, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(store.count_queued().await.unwrap(), 1);
        assert_eq!(store.attempt_count(), 0);
    }

    #[test]
    fn test_supported_events() {
        assert!(is_supported_event("clip.submitted"));
        assert!(is_supported_event("clip.approved"));
        assert!(is_supported_event("clip.rejected"));
        assert!(!is_supported_event("clip.deleted"));
    }

    #[test]
    fn test_register_subscription() {
        let sub = register_subscription(
            "https://hooks.example.com/clipper",
            ["clip.approved", "clip.rejected"],
            false,
        )
        .unwrap();
        assert!(sub.active);
        assert_eq!(sub.secret.len(), 64);
        assert!(sub.wants("clip.approved"));
        assert!(!sub.wants("clip.submitted"));
    }

    #[test]
    fn test_register_subscription_rejects_bad_input() {
        let cases: [(&str, Vec<&str>); 4] = [
            ("ftp://hooks.example.com", vec!["clip.approved"]),
            ("http://10.0.0.5/hook", vec!["clip.approved"]),
            ("https://hooks.example.com", vec![]),
            ("https://hooks.example.com", vec!["clip.deleted"]),
        ];
        for (url, events) in cases {
            let err = register_subscription(url, events, false).unwrap_err();
            assert!(matches!(err, Error::InvalidPayload(_)), "{url}");
        }
    }
}
