use super::{classify_status, transport_error, ContentFetcher, USER_AGENT};
use crate::error::UpstreamError;
use crate::rotator::CredentialSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Reads post text through the v2 lookup endpoint using an app bearer token.
#[derive(Clone)]
pub struct HttpContentFetcher {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for HttpContentFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContentFetcher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: Option<LookupData>,
    #[serde(default)]
    errors: Vec<LookupProblem>,
}

#[derive(Debug, Deserialize)]
struct LookupData {
    text: String,
    note_tweet: Option<NoteTweet>,
}

#[derive(Debug, Deserialize)]
struct NoteTweet {
    text: String,
}

#[derive(Debug, Deserialize)]
struct LookupProblem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

impl HttpContentFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid content base URL")?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn build_request(&self, item_id: &str, creds: &CredentialSet) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join(&format!("2/tweets/{}", item_id))
            .context("invalid content base URL")?;
        endpoint
            .query_pairs_mut()
            .append_pair("tweet.fields", "text,note_tweet");
        self.http
            .get(endpoint)
            .bearer_auth(creds.token())
            .build()
            .context("failed to build lookup request")
    }
}

/// Long posts carry their full text in `note_tweet`; prefer it.
fn extract_text(body: &str) -> Result<String, UpstreamError> {
    let parsed: LookupResponse = serde_json::from_str(body)
        .map_err(|e| UpstreamError::Transient(format!("invalid lookup response: {}", e)))?;
    if let Some(data) = parsed.data {
        let text = data.note_tweet.map(|n| n.text).unwrap_or(data.text);
        return Ok(text);
    }
    // The lookup endpoint answers 200 with an `errors` array for deleted or
    // protected items.
    match parsed.errors.first() {
        Some(p) if p.title.contains("Not Found") => Err(UpstreamError::NotFound),
        Some(p) if p.title.contains("Authorization") || p.title.contains("Forbidden") => {
            Err(UpstreamError::Forbidden)
        }
        Some(p) => Err(UpstreamError::Rejected(format!("{}: {}", p.title, p.detail))),
        None => Err(UpstreamError::NotFound),
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, item_id: &str, creds: &CredentialSet) -> Result<String, UpstreamError> {
        let request = self
            .build_request(item_id, creds)
            .map_err(|e| UpstreamError::Rejected(e.to_string()))?;
        debug!(url = %request.url(), credential = creds.index, "fetching item");
        let res = self.http.execute(request).await.map_err(transport_error)?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.text().await.map_err(transport_error)?;
        if !status.is_success() {
            warn!(%status, item_id, "content lookup failed");
            return Err(classify_status(status, &headers, &body));
        }
        extract_text(&body)
    }
}
