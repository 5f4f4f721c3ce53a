//! Error taxonomy shared by the executor, the pipeline and the action layer.
use crate::model::OperationClass;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by one call to an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("rate limited upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("item not found")]
    NotFound,
    #[error("access forbidden")]
    Forbidden,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("rejected upstream: {0}")]
    Rejected(String),
}

impl UpstreamError {
    /// Transient failures and timeouts are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }

    /// Short machine-readable label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::RateLimited { .. } => "rate_limited",
            UpstreamError::NotFound => "not_found",
            UpstreamError::Forbidden => "forbidden",
            UpstreamError::Transient(_) => "transient",
            UpstreamError::Rejected(_) => "rejected",
        }
    }
}

/// Terminal result of `RetryExecutor::execute`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// Every credential set of the class is cooling down.
    #[error("no {0} credentials available")]
    NoCredentialsAvailable(OperationClass),
    /// The class has no credential sets configured at all.
    #[error("no {0} credentials configured")]
    PoolEmpty(OperationClass),
    #[error("{0} rate limit exceeded")]
    RateLimitExceeded(OperationClass),
    #[error("{class} failed after {attempts} attempts: {last}")]
    UpstreamFailure {
        class: OperationClass,
        attempts: u32,
        last: UpstreamError,
    },
    /// Non-retryable upstream answer (not found, forbidden, rejected).
    #[error("{class} failed: {cause}")]
    Permanent {
        class: OperationClass,
        cause: UpstreamError,
    },
}

impl ExecError {
    /// A configuration error halts the whole run, not only the item.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, ExecError::PoolEmpty(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::NoCredentialsAvailable(_) => "no_credentials",
            ExecError::PoolEmpty(_) => "pool_empty",
            ExecError::RateLimitExceeded(_) => "rate_limit_exceeded",
            ExecError::UpstreamFailure { .. } => "upstream_failure",
            ExecError::Permanent { cause, .. } => cause.kind(),
        }
    }
}

/// Refusal of a batch start request. Nothing has been processed when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("a batch run is already active for this user")]
    AlreadyRunning,
    #[error("daily publish quota reached ({used}/{cap})")]
    QuotaExceeded { used: i64, cap: i64 },
    #[error("payment required")]
    PaymentRequired { requirements: Value },
    #[error("invalid batch request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StartError {
    pub fn code(&self) -> &'static str {
        match self {
            StartError::AlreadyRunning => "already_running",
            StartError::QuotaExceeded { .. } => "quota_exceeded",
            StartError::PaymentRequired { .. } => "payment_required",
            StartError::Invalid(_) => "invalid_request",
            StartError::Internal(_) => "internal",
        }
    }
}

/// Failure of a user action on a queue entry.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("queue entry {0} not found")]
    NotFound(i64),
    #[error("daily publish quota reached ({used}/{cap})")]
    QuotaExceeded { used: i64, cap: i64 },
    #[error("publish rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Upstream(ExecError),
    #[error("invalid action: {0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Quota and payment gate refusals.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("daily publish quota reached ({used}/{cap})")]
    QuotaExceeded { used: i64, cap: i64 },
    #[error("payment required")]
    PaymentRequired { requirements: Value },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<GateError> for StartError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::QuotaExceeded { used, cap } => StartError::QuotaExceeded { used, cap },
            GateError::PaymentRequired { requirements } => {
                StartError::PaymentRequired { requirements }
            }
            GateError::Internal(e) => StartError::Internal(e),
        }
    }
}

impl From<GateError> for ActionError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::QuotaExceeded { used, cap } => ActionError::QuotaExceeded { used, cap },
            GateError::PaymentRequired { .. } => {
                ActionError::Invalid("payment required".into())
            }
            GateError::Internal(e) => ActionError::Internal(e),
        }
    }
}
