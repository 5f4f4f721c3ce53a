use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest reply the publish endpoint accepts.
pub const MAX_REPLY_CHARS: usize = 280;

/// Stored excerpt length for source content.
pub const EXCERPT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Fetch,
    Generate,
    Publish,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [
        OperationClass::Fetch,
        OperationClass::Generate,
        OperationClass::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Fetch => "fetch",
            OperationClass::Generate => "generate",
            OperationClass::Publish => "publish",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
        }
    }

    /// A run in one of these states blocks a new start for the same user.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Stopping)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse_level(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogLevel::Info),
            "success" => Some(LogLevel::Success),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Witty,
    Friendly,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Witty => "witty",
            Tone::Friendly => "friendly",
        }
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "professional" => Ok(Tone::Professional),
            "casual" => Ok(Tone::Casual),
            "witty" => Ok(Tone::Witty),
            "friendly" => Ok(Tone::Friendly),
            other => Err(format!(
                "tone must be one of professional, casual, witty, friendly (got '{}')",
                other
            )),
        }
    }
}

/// A pending reply awaiting human action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub user_id: i64,
    pub item_ref: String,
    pub content_excerpt: String,
    pub reply_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub item_ref: String,
    pub content_excerpt: String,
    pub reply_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub id: i64,
    pub user_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Published,
    Manual,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Published => "published",
            HistoryStatus::Manual => "manual",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "published" => Some(HistoryStatus::Published),
            "manual" => Some(HistoryStatus::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub item_ref: String,
    pub content_excerpt: Option<String>,
    pub reply_text: String,
    pub status: HistoryStatus,
    pub published_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub publish_count: i64,
    pub fetched_count: i64,
    pub generated_count: i64,
}

impl DailyStats {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            publish_count: 0,
            fetched_count: 0,
            generated_count: 0,
        }
    }
}

/// Result of processing one item of a batch. Failures stay contained to the
/// item; only the run loop decides whether anything is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success { entry_id: i64 },
    Skipped { reason: String },
    InvalidItem { reason: String },
    FetchFailed { cause: String },
    GenerateFailed { cause: String },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success { .. })
    }
}

static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/status/(\d+)").unwrap());
static IN_REPLY_TO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"in_reply_to=(\d+)").unwrap());
static TWEET_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"tweet_id=(\d+)").unwrap());
static RAW_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{15,20}$").unwrap());

/// Extract the item id from a status URL, an intent URL or a raw id.
pub fn extract_item_id(input: &str) -> Option<String> {
    for re in [&*STATUS_RE, &*IN_REPLY_TO_RE, &*TWEET_ID_RE] {
        if let Some(caps) = re.captures(input) {
            return Some(caps[1].to_string());
        }
    }
    let trimmed = input.trim();
    if RAW_ID_RE.is_match(trimmed) {
        return Some(trimmed.to_string());
    }
    None
}

/// Truncate to at most `max` characters on a char boundary.
pub fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

pub fn validate_reply_text(text: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err("reply text cannot be empty".into());
    }
    if text.chars().count() > MAX_REPLY_CHARS {
        return Err(format!("reply text exceeds {} characters", MAX_REPLY_CHARS));
    }
    Ok(())
}
