//! Metrics and health reporting for webhook processing
//!
//! Two layers:
//! - [`WebhookMetrics`]: lock-free in-process counters plus a delivery latency
//!   histogram. Every increment is mirrored to the `metrics` facade so an
//!   installed exporter picks it up; without one the facade is a no-op.
//! - [`HealthReporter`]: the storage-backed snapshot (pending retries,
//!   dead-letter count, recent delivery outcomes). Always queried live.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clipper_webhooks::metrics::{HealthReporter, WebhookMetrics};
//! use clipper_webhooks::store::InMemoryStore;
//!
//! # async fn demo() -> clipper_webhooks::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let reporter = HealthReporter::new(store.clone(), store.clone());
//! let snapshot = reporter.snapshot().await?;
//! assert_eq!(snapshot.pending_retries, 0);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{DeliveryAttemptRecord, FailureKind, RetrySource};
use crate::store::{DeliveryStats, EventStore, QueueStore};

/// Window for the "recent" delivery counts in the snapshot
pub const RECENT_WINDOW: Duration = Duration::from_secs(3600);

// ============================================================================
// Latency Histogram
// ============================================================================

/// Delivery latency percentiles in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Median
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Samples recorded
    pub count: u64,
    /// Mean
    pub mean_ms: f64,
    /// Maximum
    pub max_ms: f64,
}

/// Thread-safe latency histogram, 1ms to 10 minutes at 3 significant figures
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Option<Histogram<u64>>>,
}

impl LatencyHistogram {
    /// Empty histogram
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Histogram::new_with_bounds(1, 600_000, 3).ok()),
        }
    }

    /// Record a latency; out-of-range values are clamped
    pub fn record_ms(&self, latency_ms: u64) {
        if let Some(hist) = self.inner.write().as_mut() {
            hist.saturating_record(latency_ms.max(1));
        }
    }

    /// Samples recorded
    pub fn count(&self) -> u64 {
        self.inner.read().as_ref().map_or(0, |h| h.len())
    }

    /// Percentile summary
    pub fn metrics(&self) -> LatencyMetrics {
        match self.inner.read().as_ref() {
            Some(hist) if !hist.is_empty() => LatencyMetrics {
                p50_ms: hist.value_at_percentile(50.0) as f64,
                p95_ms: hist.value_at_percentile(95.0) as f64,
                p99_ms: hist.value_at_percentile(99.0) as f64,
                count: hist.len(),
                mean_ms: hist.mean(),
                max_ms: hist.max() as f64,
            },
            _ => LatencyMetrics::default(),
        }
    }

    /// Clear all samples
    pub fn reset(&self) {
        if let Some(hist) = self.inner.write().as_mut() {
            hist.reset();
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Counters
// ============================================================================

/// In-process counters for ingestion, delivery and retries
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    /// Inbound events accepted as new
    pub inbound_received: AtomicU64,
    /// Inbound deliveries suppressed as duplicates
    pub inbound_duplicates: AtomicU64,
    /// Inbound events whose first processing failed
    pub inbound_failures: AtomicU64,
    /// Successful outbound attempts
    pub deliveries_success: AtomicU64,
    /// Failed outbound attempts (non-timeout)
    pub deliveries_failure: AtomicU64,
    /// Timed-out outbound attempts
    pub deliveries_timeout: AtomicU64,
    /// Retry attempts made by the scheduler
    pub retries_attempted: AtomicU64,
    /// Retry attempts that succeeded
    pub retries_succeeded: AtomicU64,
    /// Items moved to the dead-letter queue
    pub dead_letter_moves: AtomicU64,
    /// Dead letters replayed by an operator
    pub replays: AtomicU64,
    delivery_latency: LatencyHistogram,
}

impl WebhookMetrics {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A new inbound event passed the idempotency guard
    pub fn record_inbound(&self) {
        self.inbound_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("webhook_inbound_events_total", "result" => "new").increment(1);
    }

    /// A duplicate inbound delivery was suppressed
    pub fn record_duplicate(&self) {
        self.inbound_duplicates.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("webhook_inbound_events_total", "result" => "duplicate").increment(1);
    }

    /// First processing of an inbound event failed and it was queued
    pub fn record_inbound_failure(&self) {
        self.inbound_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("webhook_inbound_events_total", "result" => "failed").increment(1);
    }

    /// Outcome and latency of a delivery attempt
    pub fn record_delivery(&self, record: &DeliveryAttemptRecord) {
        let outcome = if record.is_success() {
            self.deliveries_success.fetch_add(1, Ordering::Relaxed);
            "success"
        } else if record.failure == Some(FailureKind::Timeout) {
            self.deliveries_timeout.fetch_add(1, Ordering::Relaxed);
            "timeout"
        } else {
            self.deliveries_failure.fetch_add(1, Ordering::Relaxed);
            "failure"
        };
        self.delivery_latency.record_ms(record.latency_ms);
        metrics::counter!("webhook_deliveries_total", "outcome" => outcome).increment(1);
        metrics::histogram!("webhook_delivery_duration_ms").record(record.latency_ms as f64);
    }

    /// Scheduler attempted a retry
    pub fn record_retry(&self, source: RetrySource, succeeded: bool) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.retries_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        let result = if succeeded { "success" } else { "failure" };
        metrics::counter!(
            "webhook_retries_total",
            "source" => source.label(),
            "result" => result
        )
        .increment(1);
    }

    /// Item moved to the dead-letter queue
    pub fn record_dead_letter(&self, source: RetrySource) {
        self.dead_letter_moves.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("webhook_dead_letter_moves_total", "source" => source.label())
            .increment(1);
    }

    /// Operator replayed a dead letter
    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("webhook_dead_letter_replays_total").increment(1);
    }

    /// Delivery latency summary
    pub fn latency(&self) -> LatencyMetrics {
        self.delivery_latency.metrics()
    }

    /// Prometheus text exposition of the counters
    pub fn to_prometheus_format(&self) -> String {
        let counters = [
            ("webhook_inbound_received_total", &self.inbound_received),
            ("webhook_inbound_duplicates_total", &self.inbound_duplicates),
            ("webhook_inbound_failures_total", &self.inbound_failures),
            ("webhook_deliveries_success_total", &self.deliveries_success),
            ("webhook_deliveries_failure_total", &self.deliveries_failure),
            ("webhook_deliveries_timeout_total", &self.deliveries_timeout),
            ("webhook_retries_attempted_total", &self.retries_attempted),
            ("webhook_retries_succeeded_total", &self.retries_succeeded),
            ("webhook_dead_letter_moves_total", &self.dead_letter_moves),
            ("webhook_dead_letter_replays_total", &self.replays),
        ];

        let mut output = String::new();
        for (name, value) in counters {
            output.push_str(&format!("{name} {}\n", value.load(Ordering::Relaxed)));
        }

        let latency = self.latency();
        if latency.count > 0 {
            output.push_str(&format!(
                "webhook_delivery_duration_p50_ms {}\n",
                latency.p50_ms
            ));
            output.push_str(&format!(
                "webhook_delivery_duration_p95_ms {}\n",
                latency.p95_ms
            ));
            output.push_str(&format!(
                "webhook_delivery_duration_p99_ms {}\n",
                latency.p99_ms
            ));
        }
        output
    }
}

// ============================================================================
// Health snapshot
// ============================================================================

/// Point-in-time view of queue health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Items still in the retry queue
    pub pending_retries: u64,
    /// Items in the dead-letter queue
    pub dead_letter_count: u64,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Delivery outcomes over the last hour
    pub recent_deliveries: DeliveryStats,
}

/// Storage-backed health reporter
#[derive(Clone)]
pub struct HealthReporter {
    queue: Arc<dyn QueueStore>,
    events: Arc<dyn EventStore>,
}

impl HealthReporter {
    /// Reporter over the queue and event stores
    pub fn new(queue: Arc<dyn QueueStore>, events: Arc<dyn EventStore>) -> Self {
        Self { queue, events }
    }

    /// Current counts, read from storage at call time
    pub async fn snapshot(&self) -> Result<HealthSnapshot> {
        let timestamp = Utc::now();
        let pending_retries = self.queue.count_queued().await?;
        let dead_letter_count = self.queue.count_dead_letters().await?;
        let since = timestamp
            - chrono::Duration::from_std(RECENT_WINDOW).unwrap_or_else(|_| chrono::Duration::hours(1));
        let recent_deliveries = self.events.delivery_stats_since(since).await?;

        metrics::gauge!("webhook_retry_queue_size").set(pending_retries as f64);
        metrics::gauge!("webhook_dead_letter_queue_size").set(dead_letter_count as f64);

        Ok(HealthSnapshot {
            pending_retries,
            dead_letter_count,
            timestamp,
            recent_deliveries,
        })
    }
}
