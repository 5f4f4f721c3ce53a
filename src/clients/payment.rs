use super::{PaymentVerifier, USER_AGENT};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Asks an external facilitator whether a payment proof settles the
/// configured requirements.
#[derive(Debug, Clone)]
pub struct HttpPaymentVerifier {
    http: Client,
    url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Verdict {
    is_valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
}

impl HttpPaymentVerifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).context("invalid payment verifier URL")?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl PaymentVerifier for HttpPaymentVerifier {
    async fn verify(&self, proof: &Value, requirements: &Value) -> Result<bool> {
        let res = self
            .http
            .post(self.url.clone())
            .json(&json!({
                "paymentPayload": proof,
                "paymentRequirements": requirements,
            }))
            .send()
            .await
            .context("failed to reach payment verifier")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("payment verifier error {}: {}", status, body));
        }
        let verdict: Verdict = res.json().await.context("invalid verifier response")?;
        if let Some(reason) = verdict.invalid_reason.as_deref() {
            tracing::info!(reason, "payment proof refused");
        }
        Ok(verdict.is_valid)
    }
}
