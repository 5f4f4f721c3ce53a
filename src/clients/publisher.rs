use super::{classify_status, transport_error, Publisher, USER_AGENT};
use crate::error::UpstreamError;
use crate::rotator::CredentialSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Posts replies with a user-context access token.
#[derive(Clone)]
pub struct HttpPublisher {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPublisher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    data: Created,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

impl HttpPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid content base URL")?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(
        &self,
        reply_text: &str,
        item_id: &str,
        creds: &CredentialSet,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("2/tweets")
            .context("invalid content base URL")?;
        let body = json!({
            "text": reply_text,
            "reply": { "in_reply_to_tweet_id": item_id },
        });
        self.http
            .post(endpoint)
            .bearer_auth(creds.token())
            .json(&body)
            .build()
            .context("failed to build publish request")
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(
        &self,
        reply_text: &str,
        item_id: &str,
        creds: &CredentialSet,
    ) -> Result<String, UpstreamError> {
        let request = self
            .build_request(reply_text, item_id, creds)
            .map_err(|e| UpstreamError::Rejected(e.to_string()))?;
        let res = self.http.execute(request).await.map_err(transport_error)?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(%status, item_id, "publish failed");
            // A 403 on the write path means the post itself was refused
            // (duplicate, reply restrictions), not that the item is hidden.
            return Err(match status {
                StatusCode::FORBIDDEN => UpstreamError::Rejected(body),
                _ => classify_status(status, &headers, &body),
            });
        }
        let created: CreateResponse = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Transient(format!("invalid publish response: {}", e)))?;
        info!(item_id, published_id = %created.data.id, "reply published");
        Ok(created.data.id)
    }
}
