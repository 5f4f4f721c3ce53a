//! Per-user log journal. Every record is persisted (the client polls it by
//! id) and mirrored to `tracing`.
use crate::db::{self, Pool};
use crate::model::{LogLevel, LogRecord};
use anyhow::Result;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct Journal {
    pool: Pool,
}

impl Journal {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Append a record. A failed write is reported through `tracing` and
    /// never interrupts the caller.
    pub async fn log(&self, user_id: i64, level: LogLevel, message: impl Into<String>) -> Option<LogRecord> {
        let message = message.into();
        match level {
            LogLevel::Error => error!(user_id, "{}", message),
            LogLevel::Warning => warn!(user_id, "{}", message),
            LogLevel::Info | LogLevel::Success => info!(user_id, level = level.as_str(), "{}", message),
        }
        match db::append_log(&self.pool, user_id, level, &message).await {
            Ok(rec) => Some(rec),
            Err(e) => {
                error!(user_id, error = %e, "failed to persist log record");
                None
            }
        }
    }

    pub async fn info(&self, user_id: i64, message: impl Into<String>) {
        self.log(user_id, LogLevel::Info, message).await;
    }

    pub async fn success(&self, user_id: i64, message: impl Into<String>) {
        self.log(user_id, LogLevel::Success, message).await;
    }

    pub async fn warning(&self, user_id: i64, message: impl Into<String>) {
        self.log(user_id, LogLevel::Warning, message).await;
    }

    pub async fn error(&self, user_id: i64, message: impl Into<String>) {
        self.log(user_id, LogLevel::Error, message).await;
    }

    pub async fn since(&self, user_id: i64, since_id: i64, limit: i64) -> Result<Vec<LogRecord>> {
        db::logs_since(&self.pool, user_id, since_id, limit).await
    }
}
