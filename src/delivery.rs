//! Delivery executor
//!
//! Signs and POSTs one payload to one subscriber, classifies the result and
//! appends a [`DeliveryAttemptRecord`] for every invocation, whatever the
//! outcome. Attempts refused locally (inactive subscription, disallowed target)
//! are recorded too, with [`FailureKind::Rejected`] and no network call.
//!
//! Outbound request:
//!
//! ```text
//! POST <target_url>
//! Content-Type: application/json
//! User-Agent: Clipper-Webhooks/1.0
//! X-Webhook-Signature: sha256=<hex hmac of body>
//! X-Webhook-Event: clip.approved
//! X-Webhook-Delivery-ID: <uuid, stable across retries>
//! X-Webhook-Attempt: <1-based attempt number>
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, info, warn};
use url::{Host, Url};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::metrics::WebhookMetrics;
use crate::model::{
    DeliveryAttemptRecord, DeliveryOutcome, FailureKind, OutboundEvent, OutboundSubscription,
    RetryQueueItem,
};
use crate::signature::signature_header;
use crate::store::EventStore;

/// `User-Agent` sent with every delivery
pub const USER_AGENT_VALUE: &str = "Clipper-Webhooks/1.0";

/// Signature header name
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Event type header name
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Delivery id header name
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-ID";
/// Attempt number header name
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

/// Response bytes kept in the attempt record
pub const MAX_RESPONSE_BODY: usize = 10 * 1024;

/// One logical delivery of an event to a subscriber; retries reuse it
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Stable id, sent as `X-Webhook-Delivery-ID` and used as the queue reference
    pub delivery_id: Uuid,
    /// Domain event id
    pub event_id: Uuid,
    /// Event type
    pub event_type: String,
    /// JSON body
    pub payload: serde_json::Value,
    /// 1-based attempt number
    pub attempt: u32,
}

impl Delivery {
    /// First attempt of a new delivery for `event`
    pub fn for_event(event: &OutboundEvent) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            payload: event.payload(),
            attempt: 1,
        }
    }

    /// Rebuild the delivery a queued outbound item refers to
    pub fn from_retry(item: &RetryQueueItem) -> Result<Self> {
        let delivery_id = Uuid::parse_str(&item.reference_id).map_err(|e| {
            Error::InvalidPayload(format!("bad delivery id {:?}: {e}", item.reference_id))
        })?;
        let event_id = item
            .payload
            .get("event_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| Error::InvalidPayload("payload has no event_id".to_string()))?;

        Ok(Self {
            delivery_id,
            event_id,
            event_type: item.event_type.clone(),
            payload: item.payload.clone(),
            // First attempt was made before the item was queued
            attempt: item.retry_count.saturating_add(2),
        })
    }
}

/// How delivery results are classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Treat 4xx (other than 429) as retriable
    pub retry_client_errors: bool,
    /// Permit loopback/private literal-IP targets
    pub allow_private_targets: bool,
}

impl From<&WebhookConfig> for DeliveryPolicy {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            timeout: config.delivery_timeout,
            retry_client_errors: config.retry_client_errors,
            allow_private_targets: config.allow_private_targets,
        }
    }
}

impl DeliveryPolicy {
    /// Map a failed attempt to the error the retry machinery acts on;
    /// `None` for a success
    pub fn classify(&self, record: &DeliveryAttemptRecord) -> Option<Error> {
        if record.is_success() {
            return None;
        }
        let message = record
            .error
            .clone()
            .unwrap_or_else(|| "delivery failed".to_string());

        Some(match (record.failure, record.http_status) {
            (Some(FailureKind::Rejected), _) => Error::DeliveryRejected(message),
            (_, Some(status))
                if (400..500).contains(&status)
                    && status != 429
                    && !self.retry_client_errors =>
            {
                Error::PermanentDeliveryFailure { status, message }
            }
            _ => Error::TransientDeliveryFailure(message),
        })
    }
}

/// Check a target URL: http(s) only, no loopback/private literal IPs unless
/// allowed. Hostnames are not resolved.
pub fn validate_target_url(target: &str, allow_private: bool) -> std::result::Result<Url, String> {
    let url = Url::parse(target).map_err(|e| format!("invalid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("scheme {:?} not allowed", url.scheme()));
    }
    if allow_private {
        return Ok(url);
    }

    let private = match url.host() {
        None => return Err("URL has no host".to_string()),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => is_private_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(IpAddr::V6(ip)),
    };
    if private {
        return Err("target points to a private or loopback address".to_string());
    }
    Ok(url)
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

/// Raw result of one attempt, before it becomes a record
struct AttemptResult {
    outcome: DeliveryOutcome,
    failure: Option<FailureKind>,
    http_status: Option<u16>,
    error: Option<String>,
}

impl AttemptResult {
    fn failed(kind: FailureKind, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            outcome: DeliveryOutcome::Failure,
            failure: Some(kind),
            http_status: status,
            error: Some(error.into()),
        }
    }
}

/// Signed HTTP delivery with an unconditional audit trail
#[derive(Clone)]
pub struct DeliveryExecutor {
    client: reqwest::Client,
    events: Arc<dyn EventStore>,
    metrics: Arc<WebhookMetrics>,
    policy: DeliveryPolicy,
}

impl DeliveryExecutor {
    /// Executor with its own HTTP client
    pub fn new(
        events: Arc<dyn EventStore>,
        metrics: Arc<WebhookMetrics>,
        policy: DeliveryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(USER_AGENT_VALUE)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            events,
            metrics,
            policy,
        })
    }

    /// Classification policy
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Attempt `delivery` to `subscription` and record the attempt.
    ///
    /// Returns the record for every outcome. The network attempt has already
    /// happened by the time the record is written, so a failure to persist it
    /// is logged and does not hide the outcome from the caller, who still has
    /// to queue a failed delivery.
    pub async fn deliver(
        &self,
        subscription: &OutboundSubscription,
        delivery: &Delivery,
    ) -> DeliveryAttemptRecord {
        let attempted_at = Utc::now();
        let started = Instant::now();

        let result = match self.precheck(subscription) {
            Ok(url) => self.send(url, subscription, delivery).await,
            Err(reason) => AttemptResult::failed(FailureKind::Rejected, None, reason),
        };

        let record = DeliveryAttemptRecord {
            attempt_id: Uuid::new_v4(),
            subscription_id: subscription.subscription_id,
            event_id: delivery.event_id,
            delivery_id: delivery.delivery_id,
            http_status: result.http_status,
            latency_ms: started.elapsed().as_millis() as u64,
            outcome: result.outcome,
            failure: result.failure,
            error: result.error,
            attempted_at,
        };

        self.metrics.record_delivery(&record);
        if let Err(e) = self.events.append_attempt(record.clone()).await {
            error!(
                delivery_id = %delivery.delivery_id,
                attempt_id = %record.attempt_id,
                error = %e,
                "Failed to store delivery attempt record"
            );
        }

        if record.is_success() {
            info!(
                delivery_id = %delivery.delivery_id,
                subscription_id = %subscription.subscription_id,
                event_type = %delivery.event_type,
                attempt = delivery.attempt,
                status = record.http_status,
                latency_ms = record.latency_ms,
                "Webhook delivered"
            );
        } else {
            warn!(
                delivery_id = %delivery.delivery_id,
                subscription_id = %subscription.subscription_id,
                event_type = %delivery.event_type,
                attempt = delivery.attempt,
                status = record.http_status,
                failure = ?record.failure,
                error = record.error.as_deref().unwrap_or_default(),
                "Webhook delivery failed"
            );
        }
        record
    }

    /// Deliver and convert a failed attempt into its retry error
    pub async fn deliver_checked(
        &self,
        subscription: &OutboundSubscription,
        delivery: &Delivery,
    ) -> Result<DeliveryAttemptRecord> {
        let record = self.deliver(subscription, delivery).await;
        match self.policy.classify(&record) {
            None => Ok(record),
            Some(err) => Err(err),
        }
    }

    fn precheck(&self, subscription: &OutboundSubscription) -> std::result::Result<Url, String> {
        if !subscription.active {
            return Err("subscription is inactive".to_string());
        }
        validate_target_url(&subscription.target_url, self.policy.allow_private_targets)
    }

    async fn send(
        &self,
        url: Url,
        subscription: &OutboundSubscription,
        delivery: &Delivery,
    ) -> AttemptResult {
        let body = match serde_json::to_vec(&delivery.payload) {
            Ok(body) => body,
            Err(e) => {
                return AttemptResult::failed(
                    FailureKind::Rejected,
                    None,
                    format!("payload serialization failed: {e}"),
                )
            }
        };
        let signature = match signature_header(&subscription.secret, &body) {
            Ok(sig) => sig,
            Err(e) => return AttemptResult::failed(FailureKind::Rejected, None, e.to_string()),
        };

        debug!(
            delivery_id = %delivery.delivery_id,
            url = %url,
            attempt = delivery.attempt,
            "Sending webhook"
        );

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, delivery.event_type.as_str())
            .header(DELIVERY_ID_HEADER, delivery.delivery_id.to_string())
            .header(ATTEMPT_HEADER, delivery.attempt.to_string())
            .body(body)
            .send()
            .await;

        let mut response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return AttemptResult::failed(
                    FailureKind::Timeout,
                    None,
                    format!("timed out after {}ms", self.policy.timeout.as_millis()),
                )
            }
            Err(e) => return AttemptResult::failed(FailureKind::Network, None, e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return AttemptResult {
                outcome: DeliveryOutcome::Success,
                failure: None,
                http_status: Some(status.as_u16()),
                error: None,
            };
        }

        let mut body = Vec::new();
        while body.len() < MAX_RESPONSE_BODY {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                _ => break,
            }
        }
        body.truncate(MAX_RESPONSE_BODY);

        AttemptResult::failed(
            FailureKind::HttpStatus,
            Some(status.as_u16()),
            format!("HTTP {}: {}", status.as_u16(), String::from_utf8_lossy(&body)),
        )
    }
}
