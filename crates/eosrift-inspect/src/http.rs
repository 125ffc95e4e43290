//! Inspector HTTP surface
//!
//! A small axum app bound to a loopback address: the UI at `/`, the entry
//! list at `/api/requests`, and replay at `/api/requests/{id}/replay`.

use crate::store::{Entry, Store};
use crate::InspectError;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(RustEmbed)]
#[folder = "assets"]
struct UiAssets;

/// Outcome of replaying a captured request against the local upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Replays a captured request. Wired up by whoever owns the upstream
/// address (the CLI), not by the inspector itself.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, entry: Entry) -> Result<ReplayOutcome, InspectError>;
}

#[derive(Default)]
pub struct HandlerOptions {
    pub replay: Option<Arc<dyn Replayer>>,
}

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    replay: Option<Arc<dyn Replayer>>,
}

#[derive(Serialize)]
struct ListRequestsResponse {
    requests: Vec<Entry>,
}

#[derive(Serialize)]
struct ReplayResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Build the inspector router.
pub fn router(store: Arc<Store>, options: HandlerOptions) -> Router {
    let state = AppState {
        store,
        replay: options.replay,
    };

    Router::new()
        .route("/", get(serve_index))
        .route("/api/requests", get(list_requests))
        .route("/api/requests/{id}/replay", post(replay_request))
        .with_state(state)
}

async fn serve_index() -> Response {
    match UiAssets::get("index.html") {
        Some(content) => (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            Html(content.data.into_owned()),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_requests(State(state): State<AppState>) -> Json<ListRequestsResponse> {
    Json(ListRequestsResponse {
        requests: state.store.list(),
    })
}

async fn replay_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(entry) = state.store.get(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let Some(replayer) = state.replay.as_ref() else {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    };

    match replayer.replay(entry).await {
        Ok(outcome) => Json(ReplayResponse {
            status_code: outcome.status_code,
            error: None,
        })
        .into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(ReplayResponse {
                status_code: None,
                error: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}
