use super::{classify_status, transport_error, ReplyGenerator, USER_AGENT};
use crate::error::UpstreamError;
use crate::model::{Tone, MAX_REPLY_CHARS};
use crate::rotator::CredentialSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*{1,2}([^*]*)\*{1,2}").unwrap());
static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)#\w+").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// OpenAI-compatible chat completion client.
#[derive(Clone)]
pub struct HttpReplyGenerator {
    http: Client,
    base_url: Url,
    model: String,
}

impl fmt::Debug for HttpReplyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpReplyGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: String,
}

pub fn build_prompt(content: &str, tone: Tone) -> String {
    let persona = match tone {
        Tone::Professional => "Be insightful, polite and clear.",
        Tone::Casual => "Be relaxed; lowercase and light slang are fine where they fit.",
        Tone::Witty => "Make a light joke or a witty observation.",
        Tone::Friendly => "Be warm and encouraging without gushing.",
    };
    format!(
        "You are replying to a post on a social network. Sound like a real person, not a bot.\n\n\
         Post: \"{content}\"\n\n\
         Instructions:\n\
         1. Adopt a {tone} tone. {persona}\n\
         2. Pick one specific detail from the post and share a quick related opinion. \
            Do not reply with generic praise.\n\
         3. Keep it under 200 characters.\n\
         4. Plain text only: no HTML, no markdown, no hashtags, no quotes.\n\
         5. Use at most one emoji.\n\n\
         Output only the reply text.",
        content = content,
        tone = tone.as_str(),
        persona = persona,
    )
}

/// Strip markup the model was told not to produce and fit the reply limit.
pub fn sanitize_reply(raw: &str) -> String {
    let text = HTML_TAG.replace_all(raw, "");
    let text = EMPHASIS.replace_all(&text, "$1");
    let text = HASHTAG.replace_all(&text, "$1");
    let text = SPACES.replace_all(&text, " ");
    let text = text.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    text.chars().take(MAX_REPLY_CHARS).collect()
}

impl HttpReplyGenerator {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid generator base URL")?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            model: model.into(),
        })
    }

    pub fn build_request(&self, content: &str, tone: Tone, creds: &CredentialSet) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v1/chat/completions")
            .context("invalid generator base URL")?;
        let body: Value = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": build_prompt(content, tone) }],
            "temperature": 1,
            "max_tokens": 256,
            "stream": false,
        });
        self.http
            .post(endpoint)
            .bearer_auth(creds.token())
            .json(&body)
            .build()
            .context("failed to build completion request")
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(
        &self,
        content: &str,
        tone: Tone,
        creds: &CredentialSet,
    ) -> Result<String, UpstreamError> {
        let request = self
            .build_request(content, tone, creds)
            .map_err(|e| UpstreamError::Rejected(e.to_string()))?;
        let res = self.http.execute(request).await.map_err(transport_error)?;
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &headers, &body));
        }
        let completion: Completion = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Transient(format!("invalid completion response: {}", e)))?;
        let raw = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let reply = sanitize_reply(&raw);
        debug!(chars = reply.chars().count(), "reply generated");
        if reply.is_empty() {
            return Err(UpstreamError::Rejected("generator returned an empty reply".into()));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationClass;

    #[test]
    fn strips_markup() {
        assert_eq!(
            sanitize_reply("<p>**Great** point about *latency*</p> #rust"),
            "Great point about latency"
        );
        assert_eq!(sanitize_reply("\"quoted reply\""), "quoted reply");
    }

    #[test]
    fn caps_reply_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_reply(&long).chars().count(), MAX_REPLY_CHARS);
    }

    #[test]
    fn prompt_names_tone_and_content() {
        let p = build_prompt("ship it", Tone::Witty);
        assert!(p.contains("witty"));
        assert!(p.contains("ship it"));
    }

    #[test]
    fn request_targets_chat_completions() {
        let g = HttpReplyGenerator::new("https://llm.example/openai/", "m", Duration::from_secs(5)).unwrap();
        let creds = CredentialSet::new(OperationClass::Generate, 0, "key");
        let req = g.build_request("hello", Tone::Casual, &creds).unwrap();
        assert_eq!(req.url().path(), "/openai/v1/chat/completions");
        assert_eq!(req.headers()["authorization"], "Bearer key");
    }
}
