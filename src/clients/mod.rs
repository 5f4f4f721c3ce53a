//! External collaborators: content fetch, reply generation, publishing and
//! payment verification. Each capability is a trait so the pipeline can be
//! driven by recording fakes in tests; the `Http*` types are the real clients.
use crate::error::UpstreamError;
use crate::model::Tone;
use crate::rotator::CredentialSet;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

pub mod content;
pub mod generator;
pub mod payment;
pub mod publisher;

pub use content::HttpContentFetcher;
pub use generator::HttpReplyGenerator;
pub use payment::HttpPaymentVerifier;
pub use publisher::HttpPublisher;

const USER_AGENT: &str = "reply-agent/0.1";

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, item_id: &str, creds: &CredentialSet) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        content: &str,
        tone: Tone,
        creds: &CredentialSet,
    ) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the id of the published reply.
    async fn publish(
        &self,
        reply_text: &str,
        item_id: &str,
        creds: &CredentialSet,
    ) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// `Ok(true)` when `proof` satisfies `requirements`.
    async fn verify(&self, proof: &Value, requirements: &Value) -> anyhow::Result<bool>;
}

/// Map a non-success HTTP status to the upstream error taxonomy.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> UpstreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::NOT_FOUND => UpstreamError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Forbidden,
        StatusCode::REQUEST_TIMEOUT => UpstreamError::Transient(format!("{}: {}", status, body)),
        s if s.is_server_error() => UpstreamError::Transient(format!("{}: {}", status, body)),
        _ => UpstreamError::Rejected(format!("{}: {}", status, body)),
    }
}

/// `retry-after` seconds, or the `x-rate-limit-reset` epoch converted to a
/// delay from now.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };
    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-rate-limit-reset").map(|reset| {
        let delta = reset - chrono::Utc::now().timestamp();
        Duration::from_secs(delta.max(0) as u64)
    })
}

pub(crate) fn transport_error(err: reqwest::Error) -> UpstreamError {
    UpstreamError::Transient(format!("request failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classifies_statuses() {
        let h = HeaderMap::new();
        assert_eq!(classify_status(StatusCode::NOT_FOUND, &h, ""), UpstreamError::NotFound);
        assert_eq!(classify_status(StatusCode::FORBIDDEN, &h, ""), UpstreamError::Forbidden);
        assert!(classify_status(StatusCode::BAD_GATEWAY, &h, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, &h, "dup"),
            UpstreamError::Rejected(_)
        ));
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("42"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &h, ""),
            UpstreamError::RateLimited {
                retry_after: Some(Duration::from_secs(42))
            }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), ""),
            UpstreamError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn rate_limit_reset_epoch_becomes_delay() {
        let mut h = HeaderMap::new();
        let reset = chrono::Utc::now().timestamp() + 120;
        h.insert("x-rate-limit-reset", HeaderValue::from_str(&reset.to_string()).unwrap());
        let d = retry_after(&h).unwrap();
        assert!(d <= Duration::from_secs(120) && d >= Duration::from_secs(118));
    }
}
