use super::{ApiResult, AppState, UserId};
use crate::model::{HistoryRecord, QueueEntry};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub url: String,
    pub reply_text: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditEntryRequest {
    pub reply_text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettleRequest {
    #[serde(default)]
    pub reply_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: i64,
    pub deleted: bool,
}

/// GET /api/queue
pub async fn list_queue(State(state): State<AppState>, UserId(user_id): UserId) -> ApiResult<Json<Vec<QueueEntry>>> {
    Ok(Json(state.actions.list(user_id).await?))
}

/// POST /api/queue
pub async fn add_entry(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(req): Json<AddEntryRequest>,
) -> ApiResult<(StatusCode, Json<QueueEntry>)> {
    let entry = state
        .actions
        .add(user_id, &req.url, &req.reply_text, req.content.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// PUT /api/queue/:id
pub async fn edit_entry(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    Json(req): Json<EditEntryRequest>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(state.actions.edit(user_id, id, &req.reply_text).await?))
}

/// DELETE /api/queue/:id
///
/// Always 200: deleting a missing entry is not an error.
pub async fn delete_entry(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    let deleted = state.actions.discard(user_id, id).await?;
    Ok(Json(DeleteResponse { id, deleted }))
}

/// POST /api/queue/:id/approve
pub async fn approve_entry(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    body: Option<Json<SettleRequest>>,
) -> ApiResult<Json<HistoryRecord>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let record = state
        .actions
        .approve(user_id, id, req.reply_text.as_deref())
        .await?;
    Ok(Json(record))
}

/// POST /api/queue/:id/confirm
pub async fn confirm_entry(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<i64>,
    body: Option<Json<SettleRequest>>,
) -> ApiResult<Json<HistoryRecord>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let record = state
        .actions
        .confirm(user_id, id, req.reply_text.as_deref())
        .await?;
    Ok(Json(record))
}

pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/queue", get(list_queue).post(add_entry))
        .route("/api/queue/:id", axum::routing::put(edit_entry).delete(delete_entry))
        .route("/api/queue/:id/approve", post(approve_entry))
        .route("/api/queue/:id/confirm", post(confirm_entry))
}
