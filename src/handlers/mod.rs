//! HTTP surface
//!
//! - [`status`]: health, readiness, status and metrics
//! - [`webhook`]: `POST /webhooks/stripe`
//! - [`admin`]: dead-letter inspection and replay behind [`require_admin`]
//!
//! [`require_admin`]: crate::security::require_admin

pub mod admin;
pub mod status;
pub mod webhook;

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::error::{Error, StorageError};
use crate::security::AdminAuth;
use crate::service::WebhookService;

pub use admin::admin_router;
pub use status::status_router;
pub use webhook::webhook_router;

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    /// The wired webhook service
    pub service: Arc<WebhookService>,
    /// Admin bearer-token check
    pub admin: AdminAuth,
    started_at: Instant,
}

impl AppState {
    /// State over `service`, reading the admin token from its configuration
    pub fn new(service: Arc<WebhookService>) -> Self {
        let admin = AdminAuth::new(service.config().admin_token.as_deref());
        Self {
            service,
            admin,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the state was built
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// The full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(status_router())
        .merge(webhook_router())
        .merge(admin_router(state.admin.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Error with an explicit status
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Status the error answers with
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Storage(StorageError::DuplicateKey(_)) => StatusCode::CONFLICT,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Signature(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidPayload(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::config::WebhookConfig;
    use crate::store::InMemoryStore;
    use crate::stripe::{NoOpHandler, StripeEventRouter};

    let service = WebhookService::new(
        WebhookConfig::test_config(),
        Arc::new(InMemoryStore::new()),
        Arc::new(StripeEventRouter::new(Arc::new(NoOpHandler))),
    )
    .expect("test config is valid");
    AppState::new(Arc::new(service))
}
