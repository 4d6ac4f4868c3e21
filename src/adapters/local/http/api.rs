use crate::adapters::local::events::hub::EventHub;
use crate::adapters::local::events::TaskEvent;
use crate::application::orchestrator::{BatchSnapshot, NudgeError, StartError};
use crate::application::segment_factory::ScriptInput;
use crate::domain::tasks::Task;
use crate::ports::control::ChainControl;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<dyn ChainControl>,
    pub event_hub: Arc<EventHub>,
}

#[derive(Debug, Deserialize)]
struct StartBatchRequest {
    scripts: Vec<ScriptInput>,
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchStarted {
    batch_id: String,
    task_id: String,
}

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/batches", post(start_batch).get(list_batches))
        .route("/batches/:id", get(get_batch).delete(cancel_batch))
        .route("/batches/:id/merge", post(merge_batch))
        .route("/tasks/events", post(task_event))
        .layer(cors)
        .with_state(state)
}

async fn start_batch(
    State(state): State<AppState>,
    Json(body): Json<StartBatchRequest>,
) -> Result<(StatusCode, Json<BatchStarted>), ApiError> {
    match state.chain.start_batch(body.scripts, body.params).await {
        Ok((batch_id, task_id)) => Ok((StatusCode::CREATED, Json(BatchStarted { batch_id, task_id }))),
        Err(e @ StartError::NoScripts) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e @ StartError::Submit(_)) => {
            warn!(error = %e, "could not start batch");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

async fn task_event(State(state): State<AppState>, Json(task): Json<Task>) -> Result<StatusCode, ApiError> {
    state
        .event_hub
        .publish(TaskEvent::Updated(task))
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "no event listener running".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_batches(State(state): State<AppState>) -> Json<Vec<BatchSnapshot>> {
    Json(state.chain.snapshot())
}

async fn get_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<BatchSnapshot>, ApiError> {
    state
        .chain
        .batch_snapshot(&id)
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown batch {}", id)))
}

async fn merge_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let pending = state.chain.claim_merge(&id).map_err(|e| match e {
        NudgeError::UnknownBatch(_) => (StatusCode::NOT_FOUND, e.to_string()),
        NudgeError::NotReady { .. } | NudgeError::Busy => (StatusCode::CONFLICT, e.to_string()),
    })?;

    info!(batch_id = %pending.batch_id(), "manual merge accepted");
    let chain = state.chain.clone();
    tokio::spawn(async move {
        chain.run_merge(pending).await;
    });
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_batch(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.chain.cancel_batch(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
