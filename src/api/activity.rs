use super::{ApiResult, AppState, UserId};
use crate::model::{DailyStats, HistoryRecord, LogRecord};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub since_id: i64,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    7
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

/// GET /api/logs?since_id=&limit=
///
/// Records newer than `since_id`, oldest first.
pub async fn logs(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(q): Query<LogsQuery>,
) -> ApiResult<Json<Vec<LogRecord>>> {
    let limit = q
        .limit
        .unwrap_or(state.log_poll_limit)
        .clamp(1, state.log_poll_limit);
    Ok(Json(
        state
            .actions
            .journal()
            .since(user_id, q.since_id.max(0), limit)
            .await?,
    ))
}

/// GET /api/stats?days=
pub async fn stats(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(q): Query<StatsQuery>,
) -> ApiResult<Json<Vec<DailyStats>>> {
    Ok(Json(state.actions.stats(user_id, q.days).await?))
}

/// GET /api/history?limit=
pub async fn history(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryRecord>>> {
    Ok(Json(state.actions.history(user_id, q.limit).await?))
}

pub fn activity_routes() -> Router<AppState> {
    Router::new()
        .route("/api/logs", get(logs))
        .route("/api/stats", get(stats))
        .route("/api/history", get(history))
}
