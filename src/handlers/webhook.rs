//! Inbound Stripe webhook endpoint.
//!
//! # Request
//!
//! - Method: POST `/webhooks/stripe`
//! - Header `Stripe-Signature: t=<unix>,v1=<hex>`
//! - Body: the Stripe event JSON
//!
//! # Responses
//!
//! - `200 {"received":true,"duplicate":bool}` once the event is processed,
//!   queued for retry or dead-lettered
//! - `400` when the body is not a Stripe event
//! - `401` when the signature does not verify
//! - `500` when storage fails; Stripe redelivers
//! - `503` when no signing secret is configured; Stripe redelivers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::{ApiError, AppState};
use crate::stripe::StripeEvent;

/// Header carrying the Stripe signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    /// Always true on 200
    pub received: bool,
    /// The event had been seen before
    pub duplicate: bool,
}

/// `POST /webhooks/stripe`
#[instrument(skip_all)]
pub async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let verifier = state.service.verifier();
    if !verifier.is_configured() {
        error!("Stripe webhook received but no signing secret is configured");
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "webhook signing secret not configured",
        ));
    }

    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = verifier.verify(&body, signature) {
        warn!(error = %e, "Rejected Stripe webhook signature");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid signature"));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Stripe webhook body is not JSON");
        ApiError::new(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"))
    })?;
    let event = StripeEvent::from_value(&payload)?;

    let outcome = state
        .service
        .inbound()
        .receive(&event.id, &event.event_type, &payload)
        .await
        .map_err(|e| {
            error!(event_id = %event.id, error = %e, "Inbound processing failed closed");
            ApiError::from(e)
        })?;

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        outcome = ?outcome,
        "Stripe webhook acknowledged"
    );

    Ok(Json(WebhookAck {
        received: true,
        duplicate: outcome.is_duplicate(),
    }))
}

/// Inbound webhook routes
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(stripe_webhook_handler))
}
