use crate::error::{ActionError, ExecError, StartError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("payment required")]
    PaymentRequired { requirements: Value },
    /// Quota or local rate limit.
    #[error("{message}")]
    TooManyRequests { code: &'static str, message: String },
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, extra) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "already_running", None),
            ApiError::PaymentRequired { requirements } => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_required",
                Some(requirements.clone()),
            ),
            ApiError::TooManyRequests { code, .. } => (StatusCode::TOO_MANY_REQUESTS, *code, None),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_failure", None),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
            }
        };
        let mut error = json!({ "code": code, "message": self.to_string() });
        if let Some(requirements) = extra {
            error["requirements"] = requirements;
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<StartError> for ApiError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            StartError::QuotaExceeded { .. } => ApiError::TooManyRequests {
                code: "quota_exceeded",
                message: err.to_string(),
            },
            StartError::PaymentRequired { requirements } => ApiError::PaymentRequired { requirements },
            StartError::Invalid(msg) => ApiError::BadRequest(msg),
            StartError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ActionError::QuotaExceeded { .. } => ApiError::TooManyRequests {
                code: "quota_exceeded",
                message: err.to_string(),
            },
            ActionError::Rejected(msg) => ApiError::BadRequest(format!("publish rejected: {}", msg)),
            ActionError::Upstream(ExecError::RateLimitExceeded(class)) => ApiError::TooManyRequests {
                code: "rate_limited",
                message: format!("{} rate limit exceeded, try again shortly", class),
            },
            ActionError::Upstream(e) => ApiError::Upstream(e.to_string()),
            ActionError::Invalid(msg) => ApiError::BadRequest(msg),
            ActionError::Internal(e) => ApiError::Internal(e),
        }
    }
}
