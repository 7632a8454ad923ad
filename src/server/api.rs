use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ws;
use crate::history::HistoryHandle;
use crate::pipeline::validate::validate_app_idea;
use crate::pipeline::{
    Collaborators, Orchestrator, PipelineSettings, RunRequest, RunStore, new_run_id,
};

/// History rows returned when `?limit=` is absent.
const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: RunStore,
    pub collaborators: Collaborators,
    pub settings: PipelineSettings,
    pub history: HistoryHandle,
    /// How long finished runs stay queryable.
    pub run_ttl: Duration,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub idea: Option<String>,
    pub tech_preferences: Option<String>,
}

#[derive(Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: &'static str,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/{id}", get(get_run).delete(delete_run))
        .route("/api/runs/{id}/ws", get(ws::ws_handler))
        .route("/api/history", get(list_history))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_run(
    State(state): State<SharedState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let idea = validate_app_idea(req.idea.as_deref())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let mut request = RunRequest::new(idea.clone());
    request.tech_preferences = req.tech_preferences;

    let run_id = new_run_id();
    spawn_run(&state, run_id.clone(), &idea, request);

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRunResponse {
            run_id,
            status: "accepted",
        }),
    ))
}

/// Register the run and drive it on its own task.
fn spawn_run(state: &SharedState, run_id: String, idea: &str, request: RunRequest) {
    let events = state.store.create(&run_id, idea);

    let observer_store = state.store.clone();
    let observer_id = run_id.clone();
    let orchestrator = Orchestrator::new(state.collaborators.clone(), state.settings.clone())
        .on_status_change(move |status, message| {
            observer_store.set_status(&observer_id, status, message);
            Ok(())
        })
        .with_event_channel(events);

    let store = state.store.clone();
    tokio::spawn(async move {
        info!(run_id = %run_id, "Run accepted");
        match orchestrator.run_with_id(run_id.clone(), request).await {
            Ok(run) => {
                store.complete(&run_id, run);
            }
            Err(err) => {
                warn!(run_id = %run_id, "Run failed: {}", err);
                store.fail(&run_id, err.failed_step(), &err.to_string());
            }
        }
    });
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get(&id) {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("Run {} not found", id))),
    }
}

async fn delete_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Run {} not found", id)))
    }
}

async fn list_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let runs = state
        .history
        .list(limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(runs))
}
