use super::{ApiError, ApiResult, AppState, UserId};
use crate::model::Tone;
use crate::pipeline::{BatchRequest, RunSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub payment_proof: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub run_id: Uuid,
}

/// POST /api/batch/start
///
/// 202 with the run id; the run continues in the background.
pub async fn start_batch(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<(StatusCode, Json<StartBatchResponse>)> {
    let tone = match request.tone.as_deref() {
        None | Some("") => Tone::default(),
        Some(t) => t.parse::<Tone>().map_err(ApiError::BadRequest)?,
    };
    let run_id = state
        .batches
        .start(
            user_id,
            BatchRequest {
                items: request.urls,
                tone,
                payment_proof: request.payment_proof,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(StartBatchResponse { run_id })))
}

/// POST /api/batch/stop
pub async fn stop_batch(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> (StatusCode, Json<RunSnapshot>) {
    (StatusCode::ACCEPTED, Json(state.batches.stop(user_id)))
}

/// GET /api/batch/status
pub async fn batch_status(State(state): State<AppState>, UserId(user_id): UserId) -> Json<RunSnapshot> {
    Json(state.batches.status(user_id))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/api/batch/start", post(start_batch))
        .route("/api/batch/stop", post(stop_batch))
        .route("/api/batch/status", get(batch_status))
}
