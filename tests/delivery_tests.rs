//! Outbound delivery tests against a live local receiver
//!
//! A throwaway axum server on `127.0.0.1:0` plays the subscriber:
//!
//! - `/ok` answers 200 and records what it received
//! - `/fail` answers 500 with a body and records the attempt
//! - `/gone` answers 410
//! - `/slow` answers after two seconds
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test delivery_tests
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use clipper_webhooks::delivery::{ATTEMPT_HEADER, DELIVERY_ID_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use clipper_webhooks::signature::signature_header;
use clipper_webhooks::store::{EventStore, InMemoryStore, QueueStore};
use clipper_webhooks::stripe::{NoOpHandler, StripeEventRouter};
use clipper_webhooks::{
    DeliveryOutcome, FailureKind, OutboundEvent, OutboundSubscription, RetrySource,
    WebhookConfig, WebhookService,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use uuid::Uuid;

const SECRET: &str = "whsec_outbound_test";

// ============================================================================
// Receiver
// ============================================================================

#[derive(Debug, Clone)]
struct Hit {
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone, Default)]
struct Receiver {
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl Receiver {
    fn hits(&self) -> Vec<Hit> {
        self.hits.lock().clone()
    }

    fn record(&self, headers: HeaderMap, body: Bytes) {
        self.hits.lock().push(Hit { headers, body });
    }
}

async fn ok(State(rx): State<Receiver>, headers: HeaderMap, body: Bytes) -> StatusCode {
    rx.record(headers, body);
    StatusCode::OK
}

async fn fail(State(rx): State<Receiver>, headers: HeaderMap, body: Bytes) -> (StatusCode, &'static str) {
    rx.record(headers, body);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn gone() -> StatusCode {
    StatusCode::GONE
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn spawn_receiver() -> (String, Receiver) {
    let receiver = Receiver::default();
    let app = Router::new()
        .route("/ok", post(ok))
        .route("/fail", post(fail))
        .route("/gone", post(gone))
        .route("/slow", post(slow))
        .with_state(receiver.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), receiver)
}

// ============================================================================
// Helpers
// ============================================================================

fn service_with(config: WebhookConfig, store: Arc<InMemoryStore>) -> Arc<WebhookService> {
    Arc::new(
        WebhookService::new(
            config,
            store,
            Arc::new(StripeEventRouter::new(Arc::new(NoOpHandler))),
        )
        .unwrap(),
    )
}

fn subscribe(store: &InMemoryStore, url: String) -> OutboundSubscription {
    let subscription = OutboundSubscription::new(url, SECRET, ["clip.approved"]);
    store.upsert_subscription(subscription.clone());
    subscription
}

fn approved() -> OutboundEvent {
    OutboundEvent::new("clip.approved", serde_json::json!({"clip_id": "clip_42"}))
}

fn header<'a>(hit: &'a Hit, name: &str) -> &'a str {
    hit.headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or_default()
}

async fn only_queued_delivery(store: &InMemoryStore) -> Uuid {
    let items = store
        .claim_due(Utc::now() + chrono::Duration::hours(1), 10, Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    items[0].reference_id.parse().unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_successful_delivery_is_signed_and_recorded() {
    let (base, receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(WebhookConfig::test_config(), store.clone());
    subscribe(&store, format!("{base}/ok"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.queued, 0);

    let hits = receiver.hits();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(
        header(hit, SIGNATURE_HEADER),
        signature_header(SECRET, &hit.body).unwrap()
    );
    assert_eq!(header(hit, EVENT_HEADER), "clip.approved");
    assert_eq!(header(hit, ATTEMPT_HEADER), "1");
    assert_eq!(header(hit, "user-agent"), "Clipper-Webhooks/1.0");

    let body: serde_json::Value = serde_json::from_slice(&hit.body).unwrap();
    assert_eq!(body["event"], "clip.approved");
    assert_eq!(body["data"]["clip_id"], "clip_42");

    let delivery_id: Uuid = header(hit, DELIVERY_ID_HEADER).parse().unwrap();
    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::Success);
    assert_eq!(attempts[0].http_status, Some(200));
    assert_eq!(store.count_queued().await.unwrap(), 0);
}

#[tokio::test]
async fn test_server_error_is_queued_with_response_body() {
    let (base, _receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(WebhookConfig::test_config(), store.clone());
    let subscription = subscribe(&store, format!("{base}/fail"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.queued, 1);

    let delivery_id = only_queued_delivery(&store).await;
    let queued = store.get_queued(&delivery_id.to_string()).await.unwrap().unwrap();
    assert_eq!(
        queued.source,
        RetrySource::Outbound {
            subscription_id: subscription.subscription_id
        }
    );
    assert_eq!(queued.max_retries, WebhookConfig::test_config().outbound_max_retries);

    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::Failure);
    assert_eq!(attempts[0].failure, Some(FailureKind::HttpStatus));
    assert_eq!(attempts[0].http_status, Some(500));
    assert_eq!(
        attempts[0].error.as_deref(),
        Some("HTTP 500: upstream exploded")
    );
}

#[tokio::test]
async fn test_timeout_is_retriable_failure_with_record() {
    let (base, _receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let config = WebhookConfig {
        delivery_timeout: Duration::from_millis(200),
        ..WebhookConfig::test_config()
    };
    let service = service_with(config, store.clone());
    subscribe(&store, format!("{base}/slow"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.queued, 1);
    assert_eq!(report.dead_lettered, 0);

    let delivery_id = only_queued_delivery(&store).await;
    let attempts = store.attempts_for_delivery(delivery_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::Failure);
    assert_eq!(attempts[0].failure, Some(FailureKind::Timeout));
    assert_eq!(attempts[0].http_status, None);

    let snapshot = service.health().snapshot().await.unwrap();
    assert_eq!(snapshot.recent_deliveries.timeout, 1);
}

#[tokio::test]
async fn test_outbound_retries_until_dead_letter() {
    let (base, receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let config = WebhookConfig {
        outbound_max_retries: 2,
        ..WebhookConfig::test_config()
    };
    let service = service_with(config, store.clone());
    subscribe(&store, format!("{base}/fail"));
    let scheduler = service.scheduler();

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.queued, 1);

    let first = scheduler
        .tick_at(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(first.rescheduled, 1);

    let second = scheduler
        .tick_at(Utc::now() + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(second.dead_lettered, 1);
    assert_eq!(store.count_queued().await.unwrap(), 0);

    let attempts: Vec<String> = receiver
        .hits()
        .iter()
        .map(|hit| header(hit, ATTEMPT_HEADER).to_string())
        .collect();
    assert_eq!(attempts, vec!["1", "2", "3"]);

    let delivery_ids: Vec<String> = receiver
        .hits()
        .iter()
        .map(|hit| header(hit, DELIVERY_ID_HEADER).to_string())
        .collect();
    assert!(delivery_ids.windows(2).all(|w| w[0] == w[1]));

    let dead = service.dead_letters().list(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reference_id, delivery_ids[0]);
    assert_eq!(dead[0].retry_count, 2);
    assert!(dead[0].final_error.contains("HTTP 500"));
}

#[tokio::test]
async fn test_client_error_dead_letters_when_policy_says_permanent() {
    let (base, _receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let config = WebhookConfig {
        retry_client_errors: false,
        ..WebhookConfig::test_config()
    };
    let service = service_with(config, store.clone());
    subscribe(&store, format!("{base}/gone"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.queued, 0);
    assert_eq!(store.count_queued().await.unwrap(), 0);
    assert_eq!(service.dead_letters().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_client_error_retried_by_default() {
    let (base, _receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(WebhookConfig::test_config(), store.clone());
    subscribe(&store, format!("{base}/gone"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.queued, 1);
}

#[tokio::test]
async fn test_private_target_rejected_without_network_call() {
    let (base, receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let config = WebhookConfig {
        allow_private_targets: false,
        ..WebhookConfig::test_config()
    };
    let service = service_with(config, store.clone());
    subscribe(&store, format!("{base}/ok"));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert!(receiver.hits().is_empty());
    assert_eq!(store.attempt_count(), 1);
}

#[tokio::test]
async fn test_unsubscribed_and_inactive_endpoints_get_nothing() {
    let (base, receiver) = spawn_receiver().await;
    let store = Arc::new(InMemoryStore::new());
    let service = service_with(WebhookConfig::test_config(), store.clone());

    let mut inactive = OutboundSubscription::new(format!("{base}/ok"), SECRET, ["clip.approved"]);
    inactive.active = false;
    store.upsert_subscription(inactive);
    store.upsert_subscription(OutboundSubscription::new(
        format!("{base}/ok"),
        SECRET,
        ["clip.rejected"],
    ));

    let report = service.outbound().trigger(&approved()).await.unwrap();
    assert_eq!(report.matched, 0);
    assert!(receiver.hits().is_empty());
    assert_eq!(store.attempt_count(), 0);
}
