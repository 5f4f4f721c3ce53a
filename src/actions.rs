//! User actions on review-queue entries.
use crate::clients::Publisher;
use crate::db::{self, Pool};
use crate::error::{ActionError, ExecError, UpstreamError};
use crate::executor::RetryExecutor;
use crate::journal::Journal;
use crate::limiter::Admission;
use crate::model::{
    excerpt, extract_item_id, validate_reply_text, DailyStats, HistoryRecord, NewQueueEntry,
    OperationClass, QueueEntry, EXCERPT_CHARS,
};
use crate::quota::QuotaGate;
use chrono::{Duration as Days, Utc};
use std::sync::Arc;
use tracing::{error, instrument};

#[derive(Clone)]
pub struct QueueActions {
    pool: Pool,
    executor: Arc<RetryExecutor>,
    publisher: Arc<dyn Publisher>,
    quota: Arc<QuotaGate>,
    journal: Journal,
}

impl QueueActions {
    pub fn new(
        pool: Pool,
        executor: Arc<RetryExecutor>,
        publisher: Arc<dyn Publisher>,
        quota: Arc<QuotaGate>,
        journal: Journal,
    ) -> Self {
        Self {
            pool,
            executor,
            publisher,
            quota,
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<QueueEntry>, ActionError> {
        Ok(db::list_queue(&self.pool, user_id).await?)
    }

    /// Queue a reply written by hand for an item.
    pub async fn add(
        &self,
        user_id: i64,
        item_url: &str,
        reply_text: &str,
        content: Option<&str>,
    ) -> Result<QueueEntry, ActionError> {
        let item_ref = extract_item_id(item_url)
            .ok_or_else(|| ActionError::Invalid(format!("no item id in '{}'", item_url)))?;
        validate_reply_text(reply_text).map_err(ActionError::Invalid)?;
        let entry = db::insert_queue_entry(
            &self.pool,
            user_id,
            &NewQueueEntry {
                item_ref,
                content_excerpt: excerpt(content.unwrap_or_default(), EXCERPT_CHARS),
                reply_text: reply_text.trim().to_string(),
            },
        )
        .await?;
        self.journal
            .info(user_id, format!("Added reply for {} manually", entry.item_ref))
            .await;
        Ok(entry)
    }

    pub async fn edit(&self, user_id: i64, id: i64, reply_text: &str) -> Result<QueueEntry, ActionError> {
        validate_reply_text(reply_text).map_err(ActionError::Invalid)?;
        if !db::update_reply_text(&self.pool, user_id, id, reply_text.trim()).await? {
            return Err(ActionError::NotFound(id));
        }
        db::get_queue_entry(&self.pool, user_id, id)
            .await?
            .ok_or(ActionError::NotFound(id))
    }

    /// Idempotent. Returns whether this call removed the entry.
    pub async fn discard(&self, user_id: i64, id: i64) -> Result<bool, ActionError> {
        let removed = db::delete_queue_entry(&self.pool, user_id, id).await?;
        if removed {
            self.journal
                .info(user_id, format!("Discarded queue entry {}", id))
                .await;
        }
        Ok(removed)
    }

    /// Publish the entry's reply (or `reply_override`) and settle it.
    ///
    /// The quota is checked under the user's publish permit and only moves
    /// when the publish succeeds. On failure the entry stays queued.
    #[instrument(skip_all, fields(user_id = user_id, id = id))]
    pub async fn approve(
        &self,
        user_id: i64,
        id: i64,
        reply_override: Option<&str>,
    ) -> Result<HistoryRecord, ActionError> {
        let _permit = self.quota.publish_permit(user_id).await;
        self.quota.check_and_reserve(user_id).await?;

        let entry = db::claim_queue_entry(&self.pool, user_id, id)
            .await?
            .ok_or(ActionError::NotFound(id))?;
        let text = reply_override
            .map(str::trim)
            .unwrap_or(entry.reply_text.as_str())
            .to_string();
        if let Err(msg) = validate_reply_text(&text) {
            db::release_claim(&self.pool, id).await?;
            return Err(ActionError::Invalid(msg));
        }

        let published = self
            .executor
            .execute(OperationClass::Publish, Admission::FailFast, |creds| {
                let publisher = Arc::clone(&self.publisher);
                let text = text.clone();
                let item_ref = entry.item_ref.clone();
                async move { publisher.publish(&text, &item_ref, &creds).await }
            })
            .await;

        let published_id = match published {
            Ok(published_id) => published_id,
            Err(e) => {
                if let Err(release) = db::release_claim(&self.pool, id).await {
                    error!(error = %release, "failed to release queue claim");
                }
                self.journal
                    .error(
                        user_id,
                        format!("Publish failed for {} ({}): {}", entry.item_ref, e.kind(), e),
                    )
                    .await;
                return Err(match e {
                    ExecError::Permanent {
                        cause: UpstreamError::Rejected(msg),
                        ..
                    } => ActionError::Rejected(msg),
                    other => ActionError::Upstream(other),
                });
            }
        };

        let record =
            db::record_publish(&self.pool, &entry, &text, &published_id, Utc::now().date_naive())
                .await?;
        self.journal
            .success(
                user_id,
                format!("Published reply to {} (id {})", entry.item_ref, published_id),
            )
            .await;
        Ok(record)
    }

    /// Settle an entry the user posted by hand. No publish call, no quota.
    /// An entry with a publish in flight is reported as `NotFound`.
    pub async fn confirm(
        &self,
        user_id: i64,
        id: i64,
        reply_override: Option<&str>,
    ) -> Result<HistoryRecord, ActionError> {
        let entry = db::get_queue_entry(&self.pool, user_id, id)
            .await?
            .ok_or(ActionError::NotFound(id))?;
        let text = reply_override
            .map(str::trim)
            .unwrap_or(entry.reply_text.as_str())
            .to_string();
        validate_reply_text(&text).map_err(ActionError::Invalid)?;
        let record = db::record_manual(&self.pool, &entry, &text)
            .await?
            .ok_or(ActionError::NotFound(id))?;
        self.journal
            .success(user_id, format!("Marked reply to {} as posted", entry.item_ref))
            .await;
        Ok(record)
    }

    pub async fn history(&self, user_id: i64, limit: i64) -> Result<Vec<HistoryRecord>, ActionError> {
        Ok(db::list_history(&self.pool, user_id, limit.clamp(1, 500)).await?)
    }

    /// Per-day counters for the last `days` days, today included.
    pub async fn stats(&self, user_id: i64, days: i64) -> Result<Vec<DailyStats>, ActionError> {
        let to = Utc::now().date_naive();
        let from = to - Days::days(days.clamp(1, 90) - 1);
        Ok(db::daily_stats(&self.pool, user_id, from, to).await?)
    }
}
