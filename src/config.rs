//! Configuration loader and validator for the reply agent.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default)]
    pub credentials: Credentials,
    pub upstream: Upstream,
    #[serde(default)]
    pub quota: Quota,
    #[serde(default)]
    pub payment: Payment,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_poll_limit")]
    pub log_poll_limit: i64,
}

fn default_bind() -> String {
    "127.0.0.1:8000".into()
}

fn default_log_poll_limit() -> i64 {
    200
}

/// Token bucket sizing for one operation class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bucket {
    pub capacity: u32,
    pub refill_per_minute: u32,
}

/// Local rate limits per operation class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Limits {
    pub fetch: Bucket,
    pub generate: Bucket,
    pub publish: Bucket,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fetch: Bucket {
                capacity: 10,
                refill_per_minute: 10,
            },
            generate: Bucket {
                capacity: 15,
                refill_per_minute: 15,
            },
            publish: Bucket {
                capacity: 5,
                refill_per_minute: 5,
            },
        }
    }
}

/// Retry and cooldown policy. All values are tunable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub cooldown_secs: u64,
    pub item_pause_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            request_timeout_secs: 30,
            cooldown_secs: 900,
            item_pause_ms: 1000,
        }
    }
}

/// Read-side credential set (bearer token).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchCredential {
    pub bearer_token: String,
}

/// Write-side credential set (user-context access token).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishCredential {
    pub access_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub fetch: Vec<FetchCredential>,
    #[serde(default)]
    pub publish: Vec<PublishCredential>,
}

/// External service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstream {
    pub content_base_url: String,
    pub generator_base_url: String,
    pub generator_api_key: String,
    pub generator_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    pub daily_publish_cap: i64,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            daily_publish_cap: 50,
        }
    }
}

/// Optional payment gate consulted before a batch starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub verifier_url: Option<String>,
    #[serde(default)]
    pub requirements: Value,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the data-dir default.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/reply-agent.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind must be non-empty"));
    }
    if cfg.app.log_poll_limit <= 0 {
        return Err(ConfigError::Invalid("app.log_poll_limit must be > 0"));
    }

    for bucket in [&cfg.limits.fetch, &cfg.limits.generate, &cfg.limits.publish] {
        if bucket.capacity == 0 {
            return Err(ConfigError::Invalid("limits.*.capacity must be > 0"));
        }
        if bucket.refill_per_minute == 0 {
            return Err(ConfigError::Invalid("limits.*.refill_per_minute must be > 0"));
        }
    }

    let r = &cfg.retry;
    if r.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be >= 1"));
    }
    if r.base_delay_ms > r.max_delay_ms {
        return Err(ConfigError::Invalid(
            "retry.base_delay_ms must not exceed retry.max_delay_ms",
        ));
    }
    if r.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("retry.request_timeout_secs must be > 0"));
    }

    if cfg
        .credentials
        .fetch
        .iter()
        .any(|c| c.bearer_token.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "credentials.fetch[].bearer_token must be non-empty",
        ));
    }
    if cfg
        .credentials
        .publish
        .iter()
        .any(|c| c.access_token.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "credentials.publish[].access_token must be non-empty",
        ));
    }

    if cfg.upstream.content_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("upstream.content_base_url must be non-empty"));
    }
    if cfg.upstream.generator_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("upstream.generator_base_url must be non-empty"));
    }
    if cfg.upstream.generator_api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("upstream.generator_api_key must be non-empty"));
    }
    if cfg.upstream.generator_model.trim().is_empty() {
        return Err(ConfigError::Invalid("upstream.generator_model must be non-empty"));
    }

    if cfg.quota.daily_publish_cap <= 0 {
        return Err(ConfigError::Invalid("quota.daily_publish_cap must be > 0"));
    }

    if cfg.payment.enabled
        && cfg
            .payment
            .verifier_url
            .as_deref()
            .map_or(true, |u| u.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "payment.verifier_url is required when payment.enabled",
        ));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind: "127.0.0.1:8000"
  log_poll_limit: 200

limits:
  fetch: { capacity: 10, refill_per_minute: 10 }
  generate: { capacity: 15, refill_per_minute: 15 }
  publish: { capacity: 5, refill_per_minute: 5 }

retry:
  max_attempts: 3
  base_delay_ms: 1000
  max_delay_ms: 10000
  request_timeout_secs: 30
  cooldown_secs: 900
  item_pause_ms: 1000

credentials:
  fetch:
    - bearer_token: "FETCH_BEARER_TOKEN_1"
    - bearer_token: "FETCH_BEARER_TOKEN_2"
  publish:
    - access_token: "PUBLISH_ACCESS_TOKEN_1"

upstream:
  content_base_url: "https://api.twitter.com/"
  generator_base_url: "https://api.groq.com/openai/"
  generator_api_key: "YOUR_GENERATOR_API_KEY"
  generator_model: "llama-3.1-8b-instant"

quota:
  daily_publish_cap: 50

payment:
  enabled: false
  verifier_url: "https://facilitator.example/verify"
  requirements:
    scheme: "exact"
    amount: "1000000"
"#
}
