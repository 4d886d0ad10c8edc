//! Status and health check handlers.
//!
//! - `/health` - liveness, always 200 while the process answers
//! - `/ready` - readiness, 200 only when storage answers a health query
//! - `/status` - version, uptime, process memory and delivery latency
//! - `/webhooks/health` - the retry/dead-letter queue snapshot
//! - `/metrics` - Prometheus text rendering of the in-process counters
//!
//! # Example Response (`/webhooks/health`)
//!
//! ```json
//! {
//!   "pending_retries": 3,
//!   "dead_letter_count": 1,
//!   "timestamp": "2026-01-01T12:00:00Z",
//!   "recent_deliveries": { "success": 120, "failure": 4, "timeout": 1 }
//! }
//! ```

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, instrument};

use super::AppState;
use crate::metrics::LatencyMetrics;

/// Server version from Cargo.toml
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name from Cargo.toml
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

// ============================================================================
// Response Types
// ============================================================================

/// Health check response for simple liveness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status
    pub status: String,
}

impl HealthResponse {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: "unavailable".to_string(),
        }
    }
}

/// Detailed server status response with runtime metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version (from Cargo.toml)
    pub version: String,

    /// Server name
    pub name: String,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Inbound events received since start
    pub inbound_received: u64,

    /// Successful outbound deliveries since start
    pub deliveries_success: u64,

    /// Failed outbound deliveries since start (timeouts included)
    pub deliveries_failure: u64,

    /// Items moved to the dead-letter queue since start
    pub dead_letter_moves: u64,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Outbound delivery latency
    pub latency: LatencyMetrics,

    /// Server status (always "running" if responding)
    pub status: String,

    /// RFC 3339 timestamp of when status was generated
    pub timestamp: String,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Collect memory metrics for the current process.
///
/// Returns zeroes if the process cannot be found.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();

    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health`
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::healthy()))
}

/// `GET /ready`
///
/// - `200 OK` when the stores answer
/// - `503 Service Unavailable` otherwise
#[instrument(skip_all)]
pub async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.health().snapshot().await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse::healthy())),
        Err(e) => {
            error!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::unavailable()),
            )
        }
    }
}

/// `GET /status`
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.service.metrics();

    let response = StatusResponse {
        version: SERVER_VERSION.to_string(),
        name: SERVER_NAME.to_string(),
        uptime_seconds: state.uptime_seconds(),
        inbound_received: metrics.inbound_received.load(Ordering::Relaxed),
        deliveries_success: metrics.deliveries_success.load(Ordering::Relaxed),
        deliveries_failure: metrics.deliveries_failure.load(Ordering::Relaxed),
        dead_letter_moves: metrics.dead_letter_moves.load(Ordering::Relaxed),
        memory: collect_memory_metrics(),
        latency: metrics.latency(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(response))
}

/// `GET /webhooks/health`
///
/// Storage failures answer `503` with the error message.
#[instrument(skip_all)]
pub async fn webhook_health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.health().snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(e) => {
            error!(error = %e, "Health snapshot failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
    }
}

/// `GET /metrics`
#[instrument(skip_all)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().to_prometheus_format(),
    )
}

// ============================================================================
// Router Setup
// ============================================================================

/// Health, status and metrics routes
pub fn status_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .route("/webhooks/health", get(webhook_health_handler))
        .route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;

    #[test]
    fn test_server_constants() {
        assert!(!SERVER_VERSION.is_empty());
        assert_eq!(SERVER_NAME, "clipper-webhooks");
    }

    #[test]
    fn test_collect_memory_metrics() {
        let memory = collect_memory_metrics();
        assert!(memory.virtual_bytes >= memory.rss_bytes || memory.virtual_bytes == 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_handler() {
        let response = readiness_handler(State(test_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_handler() {
        let state = test_state();
        state.service.metrics().record_inbound();
        let response = status_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_is_text() {
        let response = metrics_handler(State(test_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/plain")));
    }
}
