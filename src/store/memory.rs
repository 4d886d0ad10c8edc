//! In-memory storage engine
//!
//! All tables live behind one `parking_lot::Mutex`, so every trait method is a
//! single critical section. That gives the same guarantees the SQL layout gets
//! from transactions: claims are atomic, and a dead-letter move either inserts
//! and deletes or does neither.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DeliveryStats, EventStore, QueueStore, SubscriptionStore};
use crate::error::{StorageError, StorageResult};
use crate::model::{
    DeadLetterItem, DeliveryAttemptRecord, DeliveryOutcome, FailureKind, InboundEvent,
    OutboundSubscription, RetryQueueItem,
};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<String, InboundEvent>,
    attempts: Vec<DeliveryAttemptRecord>,
    queue: HashMap<Uuid, RetryQueueItem>,
    /// reference_id -> item_id, enforcing one queue row per reference
    queue_refs: HashMap<String, Uuid>,
    dead_letters: HashMap<Uuid, DeadLetterItem>,
    subscriptions: HashMap<Uuid, OutboundSubscription>,
}

impl Tables {
    /// The claimed row, if `claim_token` still holds it
    fn claimed_mut(&mut self, item_id: Uuid, claim_token: Uuid) -> StorageResult<&mut RetryQueueItem> {
        match self.queue.get_mut(&item_id) {
            Some(item) if item.claim_token == Some(claim_token) => Ok(item),
            Some(_) => Err(StorageError::ClaimLost(item_id.to_string())),
            None => Err(StorageError::NotFound(item_id.to_string())),
        }
    }

    fn remove_queued(&mut self, item_id: Uuid) -> Option<RetryQueueItem> {
        let item = self.queue.remove(&item_id)?;
        self.queue_refs.remove(&item.reference_id);
        Some(item)
    }
}

/// Process-local store implementing every storage trait
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a subscription
    pub fn upsert_subscription(&self, subscription: OutboundSubscription) {
        self.tables
            .lock()
            .subscriptions
            .insert(subscription.subscription_id, subscription);
    }

    /// Simulate a backend outage: every operation fails with `Backend` while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of inbound event rows
    pub fn event_count(&self) -> usize {
        self.tables.lock().events.len()
    }

    /// Number of attempt records
    pub fn attempt_count(&self) -> usize {
        self.tables.lock().attempts.len()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

fn lease_duration(lease: Duration) -> StorageResult<chrono::Duration> {
    chrono::Duration::from_std(lease).map_err(|e| StorageError::Backend(format!("invalid lease: {e}")))
}

#[async_trait::async_trait]
impl EventStore for InMemoryStore {
    async fn insert_event(&self, event: InboundEvent) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if tables.events.contains_key(&event.external_id) {
            return Err(StorageError::DuplicateKey(event.external_id));
        }
        tables.events.insert(event.external_id.clone(), event);
        Ok(())
    }

    async fn mark_processed(
        &self,
        external_id: &str,
        error: Option<&str>,
    ) -> StorageResult<InboundEvent> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let event = tables
            .events
            .get_mut(external_id)
            .ok_or_else(|| StorageError::NotFound(external_id.to_string()))?;
        event.processed = true;
        event.processing_error = error.map(str::to_string);
        event.attempts += 1;
        event.processed_at = Some(Utc::now());
        Ok(event.clone())
    }

    async fn record_failure(&self, external_id: &str, error: &str) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let event = tables
            .events
            .get_mut(external_id)
            .ok_or_else(|| StorageError::NotFound(external_id.to_string()))?;
        event.processing_error = Some(error.to_string());
        event.attempts += 1;
        Ok(())
    }

    async fn get_event(&self, external_id: &str) -> StorageResult<Option<InboundEvent>> {
        self.check_available()?;
        Ok(self.tables.lock().events.get(external_id).cloned())
    }

    async fn append_attempt(&self, record: DeliveryAttemptRecord) -> StorageResult<()> {
        self.check_available()?;
        self.tables.lock().attempts.push(record);
        Ok(())
    }

    async fn attempts_for_delivery(
        &self,
        delivery_id: Uuid,
    ) -> StorageResult<Vec<DeliveryAttemptRecord>> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .attempts
            .iter()
            .filter(|record| record.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn delivery_stats_since(&self, since: DateTime<Utc>) -> StorageResult<DeliveryStats> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut stats = DeliveryStats::default();
        for record in tables.attempts.iter().filter(|r| r.attempted_at >= since) {
            match (record.outcome, record.failure) {
                (DeliveryOutcome::Success, _) => stats.success += 1,
                (DeliveryOutcome::Failure, Some(FailureKind::Timeout)) => stats.timeout += 1,
                (DeliveryOutcome::Failure, _) => stats.failure += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryStore {
    async fn enqueue(&self, item: RetryQueueItem) -> StorageResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if tables.queue_refs.contains_key(&item.reference_id) {
            return Ok(false);
        }
        tables
            .queue_refs
            .insert(item.reference_id.clone(), item.item_id);
        tables.queue.insert(item.item_id, item);
        Ok(true)
    }

    async fn capture_inbound(
        &self,
        event: InboundEvent,
        mut item: RetryQueueItem,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StorageResult<RetryQueueItem> {
        self.check_available()?;
        let lease = lease_duration(lease)?;
        let mut tables = self.tables.lock();
        if tables.events.contains_key(&event.external_id) {
            return Err(StorageError::DuplicateKey(event.external_id));
        }
        if tables.queue_refs.contains_key(&item.reference_id) {
            return Err(StorageError::DuplicateKey(item.reference_id));
        }

        item.claim_token = Some(Uuid::new_v4());
        item.claimed_until = Some(now + lease);
        tables.events.insert(event.external_id.clone(), event);
        tables
            .queue_refs
            .insert(item.reference_id.clone(), item.item_id);
        tables.queue.insert(item.item_id, item.clone());
        Ok(item)
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> StorageResult<Vec<RetryQueueItem>> {
        self.check_available()?;
        let lease = lease_duration(lease)?;

        let mut tables = self.tables.lock();
        let mut due: Vec<(DateTime<Utc>, Uuid)> = tables
            .queue
            .values()
            .filter(|item| item.is_claimable(now))
            .map(|item| (item.next_retry_at, item.item_id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, item_id) in due {
            if let Some(item) = tables.queue.get_mut(&item_id) {
                item.claim_token = Some(Uuid::new_v4());
                item.claimed_until = Some(now + lease);
                item.updated_at = now;
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StorageResult<DateTime<Utc>> {
        self.check_available()?;
        let lease = lease_duration(lease)?;
        let mut tables = self.tables.lock();
        let item = tables.claimed_mut(item_id, claim_token)?;
        let until = now + lease;
        item.claimed_until = Some(until);
        item.updated_at = now;
        Ok(until)
    }

    async fn complete(&self, item_id: Uuid, claim_token: Uuid) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        tables.claimed_mut(item_id, claim_token)?;
        tables.remove_queued(item_id);
        Ok(())
    }

    async fn reschedule(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let item = tables.claimed_mut(item_id, claim_token)?;
        item.retry_count = retry_count;
        item.next_retry_at = next_retry_at;
        item.last_error = Some(last_error.to_string());
        item.claim_token = None;
        item.claimed_until = None;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn move_to_dead_letter(
        &self,
        item_id: Uuid,
        claim_token: Uuid,
        retry_count: u32,
        final_error: &str,
        moved_at: DateTime<Utc>,
    ) -> StorageResult<DeadLetterItem> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        tables.claimed_mut(item_id, claim_token)?;
        let mut item = tables
            .remove_queued(item_id)
            .ok_or_else(|| StorageError::NotFound(item_id.to_string()))?;
        item.retry_count = retry_count;
        let dead = DeadLetterItem::from_retry(&item, final_error, moved_at);
        tables.dead_letters.insert(dead.dead_letter_id, dead.clone());
        Ok(dead)
    }

    async fn insert_dead_letter(&self, item: DeadLetterItem) -> StorageResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        if tables.dead_letters.contains_key(&item.dead_letter_id) {
            return Err(StorageError::DuplicateKey(item.dead_letter_id.to_string()));
        }
        tables.dead_letters.insert(item.dead_letter_id, item);
        Ok(())
    }

    async fn get_queued(&self, reference_id: &str) -> StorageResult<Option<RetryQueueItem>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .queue_refs
            .get(reference_id)
            .and_then(|id| tables.queue.get(id))
            .cloned())
    }

    async fn count_queued(&self) -> StorageResult<u64> {
        self.check_available()?;
        Ok(self.tables.lock().queue.len() as u64)
    }

    async fn list_dead_letters(
        &self,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<DeadLetterItem>> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut items: Vec<DeadLetterItem> = tables.dead_letters.values().cloned().collect();
        items.sort_by(|a, b| b.moved_at.cmp(&a.moved_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_dead_letter(
        &self,
        dead_letter_id: Uuid,
    ) -> StorageResult<Option<DeadLetterItem>> {
        self.check_available()?;
        Ok(self.tables.lock().dead_letters.get(&dead_letter_id).cloned())
    }

    async fn count_dead_letters(&self) -> StorageResult<u64> {
        self.check_available()?;
        Ok(self.tables.lock().dead_letters.len() as u64)
    }

    async fn requeue_dead_letter(
        &self,
        dead_letter_id: Uuid,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> StorageResult<RetryQueueItem> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        let dead = tables
            .dead_letters
            .get(&dead_letter_id)
            .ok_or_else(|| StorageError::NotFound(dead_letter_id.to_string()))?;
        if tables.queue_refs.contains_key(&dead.reference_id) {
            return Err(StorageError::DuplicateKey(dead.reference_id.clone()));
        }

        let mut item = RetryQueueItem::new(
            dead.reference_id.clone(),
            dead.source,
            dead.event_type.clone(),
            dead.payload.clone(),
            max_retries,
            now,
            Some(format!("replay of dead letter {dead_letter_id}")),
        );
        item.created_at = now;
        item.updated_at = now;

        tables
            .queue_refs
            .insert(item.reference_id.clone(), item.item_id);
        tables.queue.insert(item.item_id, item.clone());
        Ok(item)
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> StorageResult<Option<OutboundSubscription>> {
        self.check_available()?;
        Ok(self.tables.lock().subscriptions.get(&subscription_id).cloned())
    }

    async fn subscriptions_for(&self, event_type: &str) -> StorageResult<Vec<OutboundSubscription>> {
        self.check_available()?;
        Ok(self
            .tables
            .lock()
            .subscriptions
            .values()
            .filter(|sub| sub.wants(event_type))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetrySource;
    use pretty_assertions::assert_eq;

    fn queued(reference: &str, due: DateTime<Utc>) -> RetryQueueItem {
        RetryQueueItem::new(
            reference,
            RetrySource::Inbound,
            "invoice.payment_failed",
            serde_json::json!({"id": reference}),
            3,
            due,
            Some("initial failure".to_string()),
        )
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_insert_event_rejects_duplicates() {
        let store = InMemoryStore::new();
        store
            .insert_event(InboundEvent::new("evt_1", "t", serde_json::json!({})))
            .await
            .unwrap();
        let err = store
            .insert_event(InboundEvent::new("evt_1", "t", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::DuplicateKey("evt_1".to_string()));
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_processed_increments_attempts() {
        let store = InMemoryStore::new();
        store
            .insert_event(InboundEvent::new("evt_1", "t", serde_json::json!({})))
            .await
            .unwrap();
        store.record_failure("evt_1", "boom").await.unwrap();
        let event = store.mark_processed("evt_1", None).await.unwrap();
        assert!(event.processed);
        assert_eq!(event.processing_error, None);
        assert_eq!(event.attempts, 2);
        assert!(event.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_event() {
        let store = InMemoryStore::new();
        let err = store.mark_processed("missing", None).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_enqueue_is_unique_per_reference() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        assert!(store.enqueue(queued("evt_1", now)).await.unwrap());
        assert!(!store.enqueue(queued("evt_1", now)).await.unwrap());
        assert_eq!(store.count_queued().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_due_orders_and_limits() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .enqueue(queued("late", now - chrono::Duration::seconds(1)))
            .await
            .unwrap();
        store
            .enqueue(queued("early", now - chrono::Duration::seconds(10)))
            .await
            .unwrap();
        store
            .enqueue(queued("future", now + chrono::Duration::seconds(10)))
            .await
            .unwrap();

        let claimed = store.claim_due(now, 1, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].reference_id, "early");
        assert!(claimed[0].claim_token.is_some());

        let claimed = store.claim_due(now, 10, LEASE).await.unwrap();
        let refs: Vec<_> = claimed.iter().map(|i| i.reference_id.as_str()).collect();
        assert_eq!(refs, vec!["late"]);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();

        let first = store.claim_due(now, 10, LEASE).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(store.claim_due(now, 10, LEASE).await.unwrap().is_empty());

        let later = now + chrono::Duration::seconds(61);
        let second = store.claim_due(later, 10, LEASE).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].claim_token, second[0].claim_token);

        // The crashed worker's token no longer works.
        let stale = first[0].claim_token.unwrap();
        let err = store.complete(first[0].item_id, stale).await.unwrap_err();
        assert!(matches!(err, StorageError::ClaimLost(_)));
        assert_eq!(store.count_queued().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capture_inbound_writes_event_and_claimed_row() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let event = InboundEvent::new("evt_1", "t", serde_json::json!({}));

        let item = store
            .capture_inbound(event.clone(), queued("evt_1", now), now, LEASE)
            .await
            .unwrap();
        assert!(item.claim_token.is_some());
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.get_queued("evt_1").await.unwrap(), Some(item));

        // Held until the lease runs out
        assert!(store.claim_due(now, 10, LEASE).await.unwrap().is_empty());
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(store.claim_due(later, 10, LEASE).await.unwrap().len(), 1);

        let err = store
            .capture_inbound(event, queued("evt_1", now), now, LEASE)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::DuplicateKey("evt_1".to_string()));
        assert_eq!(store.count_queued().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capture_inbound_writes_nothing_when_unavailable() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.set_unavailable(true);
        let event = InboundEvent::new("evt_1", "t", serde_json::json!({}));
        assert!(store
            .capture_inbound(event, queued("evt_1", now), now, LEASE)
            .await
            .is_err());
        store.set_unavailable(false);
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.count_queued().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_renew_claim_extends_lease() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);
        let token = item.claim_token.unwrap();

        let later = now + chrono::Duration::seconds(50);
        let until = store
            .renew_claim(item.item_id, token, later, LEASE)
            .await
            .unwrap();
        assert_eq!(until, later + chrono::Duration::seconds(60));

        // The original lease would have expired by now; the renewed one has not
        let after_first_lease = now + chrono::Duration::seconds(61);
        assert!(store
            .claim_due(after_first_lease, 1, LEASE)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_renew_claim_after_takeover_is_lost() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let first = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);
        let later = now + chrono::Duration::seconds(61);
        store.claim_due(later, 1, LEASE).await.unwrap();

        let err = store
            .renew_claim(first.item_id, first.claim_token.unwrap(), later, LEASE)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ClaimLost(_)));
    }

    #[tokio::test]
    async fn test_complete_removes_item() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);
        store
            .complete(item.item_id, item.claim_token.unwrap())
            .await
            .unwrap();
        assert_eq!(store.count_queued().await.unwrap(), 0);
        assert!(store.get_queued("evt_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reschedule_releases_claim() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);
        let next = now + chrono::Duration::seconds(60);
        store
            .reschedule(item.item_id, item.claim_token.unwrap(), 1, next, "again")
            .await
            .unwrap();

        let stored = store.get_queued("evt_1").await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, next);
        assert_eq!(stored.last_error.as_deref(), Some("again"));
        assert_eq!(stored.claim_token, None);
        assert!(store.claim_due(next, 1, LEASE).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_move_to_dead_letter_is_atomic() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);

        let dead = store
            .move_to_dead_letter(item.item_id, item.claim_token.unwrap(), 3, "final", now)
            .await
            .unwrap();

        assert_eq!(dead.retry_count, 3);
        assert_eq!(store.count_queued().await.unwrap(), 0);
        assert_eq!(store.count_dead_letters().await.unwrap(), 1);
        assert_eq!(
            store.get_dead_letter(dead.dead_letter_id).await.unwrap(),
            Some(dead)
        );
    }

    #[tokio::test]
    async fn test_failed_move_leaves_item_queued() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);

        let err = store
            .move_to_dead_letter(item.item_id, Uuid::new_v4(), 3, "final", now)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ClaimLost(_)));
        assert_eq!(store.count_queued().await.unwrap(), 1);
        assert_eq!(store.count_dead_letters().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requeue_dead_letter() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.enqueue(queued("evt_1", now)).await.unwrap();
        let item = store.claim_due(now, 1, LEASE).await.unwrap().remove(0);
        let dead = store
            .move_to_dead_letter(item.item_id, item.claim_token.unwrap(), 3, "final", now)
            .await
            .unwrap();

        let fresh = store
            .requeue_dead_letter(dead.dead_letter_id, 3, now)
            .await
            .unwrap();
        assert_eq!(fresh.retry_count, 0);
        assert_eq!(fresh.reference_id, "evt_1");
        assert_ne!(fresh.item_id, item.item_id);
        assert_eq!(store.count_dead_letters().await.unwrap(), 1);

        let err = store
            .requeue_dead_letter(dead.dead_letter_id, 3, now)
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::DuplicateKey("evt_1".to_string()));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.count_queued().await,
            Err(StorageError::Backend(_))
        ));
        assert!(store
            .insert_event(InboundEvent::new("evt_1", "t", serde_json::json!({})))
            .await
            .is_err());
        store.set_unavailable(false);
        assert_eq!(store.count_queued().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscriptions_for_filters_inactive() {
        let store = InMemoryStore::new();
        let active = OutboundSubscription::new("https://a.example", "s", ["clip.approved"]);
        let mut inactive = OutboundSubscription::new("https://b.example", "s", ["clip.approved"]);
        inactive.active = false;
        store.upsert_subscription(active.clone());
        store.upsert_subscription(inactive);

        let subs = store.subscriptions_for("clip.approved").await.unwrap();
        assert_eq!(subs, vec![active]);
        assert!(store.subscriptions_for("clip.rejected").await.unwrap().is_empty());
    }
}
