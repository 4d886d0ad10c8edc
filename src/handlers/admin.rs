//! Dead-letter administration.
//!
//! All routes require `Authorization: Bearer <CLIPPER_WEBHOOKS_ADMIN_TOKEN>`.
//!
//! - `GET /admin/dead-letters?limit=N&offset=M` - newest first
//! - `GET /admin/dead-letters/:id`
//! - `POST /admin/dead-letters/:id/replay` - re-enqueue with `retry_count = 0`,
//!   due now; `409` if the reference is already queued

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::dead_letter::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::model::{DeadLetterItem, RetryQueueItem};
use crate::security::{require_admin, AdminAuth};

/// Paging parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListQuery {
    /// Page size, clamped to `1..=500`
    pub limit: Option<usize>,
    /// Items to skip
    pub offset: Option<usize>,
}

/// One page of dead letters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterPage {
    /// Items on this page
    pub items: Vec<DeadLetterItem>,
    /// Total dead letters stored
    pub total: u64,
    /// Effective page size
    pub limit: usize,
    /// Effective offset
    pub offset: usize,
}

/// `GET /admin/dead-letters`
#[instrument(skip_all)]
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeadLetterPage>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let dead_letters = state.service.dead_letters();
    let items = dead_letters.list_page(limit, offset).await?;
    let total = dead_letters.count().await?;

    Ok(Json(DeadLetterPage {
        items,
        total,
        limit,
        offset,
    }))
}

/// `GET /admin/dead-letters/:id`
#[instrument(skip_all, fields(dead_letter_id = %id))]
pub async fn get_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeadLetterItem>, ApiError> {
    state
        .service
        .dead_letters()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("dead letter {id} not found")))
}

/// `POST /admin/dead-letters/:id/replay`
#[instrument(skip_all, fields(dead_letter_id = %id))]
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RetryQueueItem>), ApiError> {
    let item = state.service.dead_letters().replay(id).await?;
    info!(item_id = %item.item_id, reference_id = %item.reference_id, "Dead letter replayed");
    Ok((StatusCode::ACCEPTED, Json(item)))
}

/// Admin routes wrapped in the bearer-token check
pub fn admin_router(auth: AdminAuth) -> Router<AppState> {
    Router::new()
        .route("/admin/dead-letters", get(list_dead_letters))
        .route("/admin/dead-letters/:id", get(get_dead_letter))
        .route("/admin/dead-letters/:id/replay", post(replay_dead_letter))
        .route_layer(middleware::from_fn_with_state(auth, require_admin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_state;
    use crate::model::RetrySource;

    async fn seed_dead_letter(state: &AppState) -> DeadLetterItem {
        let item = RetryQueueItem::new(
            "evt_dead",
            RetrySource::Inbound,
            "customer.created",
            serde_json::json!({"id": "evt_dead"}),
            3,
            chrono::Utc::now(),
            Some("boom".to_string()),
        );
        state
            .service
            .dead_letters()
            .bury(&item, "boom")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_clamps_limit() {
        let state = test_state();
        seed_dead_letter(&state).await;

        let Json(page) = list_dead_letters(
            State(state),
            Query(ListQuery {
                limit: Some(10_000),
                offset: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(page.limit, MAX_LIST_LIMIT);
        assert_eq!(page.total, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let err = get_dead_letter(State(test_state()), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replay_twice_conflicts() {
        let state = test_state();
        let dead = seed_dead_letter(&state).await;

        let (status, Json(item)) =
            replay_dead_letter(State(state.clone()), Path(dead.dead_letter_id))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(item.retry_count, 0);
        assert_eq!(item.reference_id, "evt_dead");

        let err = replay_dead_letter(State(state), Path(dead.dead_letter_id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
