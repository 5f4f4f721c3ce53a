//! HTTP API. Authentication happens upstream; the caller's identity arrives
//! in the `x-user-id` header.
use crate::actions::QueueActions;
use crate::pipeline::BatchManager;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    Router,
};
use chrono::{DateTime, Utc};

pub mod activity;
pub mod batch;
pub mod error;
pub mod health;
pub mod queue;

pub use error::{ApiError, ApiResult};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub batches: BatchManager,
    pub actions: QueueActions,
    pub log_poll_limit: i64,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(batches: BatchManager, actions: QueueActions, log_poll_limit: i64) -> Self {
        Self {
            batches,
            actions,
            log_poll_limit,
            startup_time: Utc::now(),
        }
    }
}

/// Authenticated user id taken from [`USER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(UserId)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing or invalid {} header", USER_HEADER)))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::health_routes())
        .merge(batch::batch_routes())
        .merge(queue::queue_routes())
        .merge(activity::activity_routes())
        .with_state(state)
}
