use super::model::StatCounter;
use crate::model::{
    DailyStats, HistoryRecord, HistoryStatus, LogLevel, LogRecord, NewQueueEntry, QueueEntry,
};
use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::instrument;

pub type Pool = SqlitePool;

const QUEUE_COLUMNS: &str = "id, user_id, item_ref, content_excerpt, reply_text, created_at";
const HISTORY_COLUMNS: &str =
    "id, user_id, item_ref, content_excerpt, reply_text, status, published_id, created_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // sqlx refuses to open a missing file unless asked to create it.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn queue_entry_from_row(row: &SqliteRow) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        item_ref: row.try_get("item_ref")?,
        content_excerpt: row.try_get("content_excerpt")?,
        reply_text: row.try_get("reply_text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn log_record_from_row(row: &SqliteRow) -> Result<LogRecord> {
    let level: String = row.try_get("level")?;
    Ok(LogRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        level: LogLevel::parse_level(&level).ok_or_else(|| anyhow!("unknown log level '{}'", level))?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryRecord> {
    let status: String = row.try_get("status")?;
    Ok(HistoryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        item_ref: row.try_get("item_ref")?,
        content_excerpt: row.try_get("content_excerpt")?,
        reply_text: row.try_get("reply_text")?,
        status: HistoryStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("unknown history status '{}'", status))?,
        published_id: row.try_get("published_id")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Review queue
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn insert_queue_entry(pool: &Pool, user_id: i64, entry: &NewQueueEntry) -> Result<QueueEntry> {
    let row = sqlx::query(&format!(
        "INSERT INTO queue (user_id, item_ref, content_excerpt, reply_text, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {}",
        QUEUE_COLUMNS
    ))
    .bind(user_id)
    .bind(&entry.item_ref)
    .bind(&entry.content_excerpt)
    .bind(&entry.reply_text)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    queue_entry_from_row(&row)
}

/// The user's entries in creation order.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn list_queue(pool: &Pool, user_id: i64) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM queue WHERE user_id = ? ORDER BY id ASC",
        QUEUE_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(queue_entry_from_row).collect()
}

#[instrument(skip_all, fields(user_id = user_id, id = id))]
pub async fn get_queue_entry(pool: &Pool, user_id: i64, id: i64) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM queue WHERE id = ? AND user_id = ?",
        QUEUE_COLUMNS
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(queue_entry_from_row).transpose()
}

/// Idempotent; returns whether a row was removed. Another user's entry is
/// treated the same as a missing one.
#[instrument(skip_all, fields(user_id = user_id, id = id))]
pub async fn delete_queue_entry(pool: &Pool, user_id: i64, id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM queue WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all, fields(user_id = user_id, id = id))]
pub async fn update_reply_text(pool: &Pool, user_id: i64, id: i64, reply_text: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE queue SET reply_text = ? WHERE id = ? AND user_id = ? AND claimed_at IS NULL",
    )
    .bind(reply_text)
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Mark an entry as being published. Returns `None` when the entry is gone,
/// belongs to someone else, or another publish already holds it.
#[instrument(skip_all, fields(user_id = user_id, id = id))]
pub async fn claim_queue_entry(pool: &Pool, user_id: i64, id: i64) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(&format!(
        "UPDATE queue SET claimed_at = ? WHERE id = ? AND user_id = ? AND claimed_at IS NULL \
         RETURNING {}",
        QUEUE_COLUMNS
    ))
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(queue_entry_from_row).transpose()
}

#[instrument(skip_all, fields(id = id))]
pub async fn release_claim(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("UPDATE queue SET claimed_at = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop every publish claim. Claims only live as long as the process that
/// took them, so this runs once at startup. Returns how many were cleared.
pub async fn clear_claims(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("UPDATE queue SET claimed_at = NULL WHERE claimed_at IS NOT NULL")
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// True when the item is already waiting in the user's queue or has been
/// published or confirmed by them before.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn item_already_handled(pool: &Pool, user_id: i64, item_ref: &str) -> Result<bool> {
    let hit = sqlx::query_scalar::<_, i64>(
        "SELECT EXISTS(SELECT 1 FROM queue WHERE user_id = ? AND item_ref = ?) \
         OR EXISTS(SELECT 1 FROM history WHERE user_id = ? AND item_ref = ?)",
    )
    .bind(user_id)
    .bind(item_ref)
    .bind(user_id)
    .bind(item_ref)
    .fetch_one(pool)
    .await?;
    Ok(hit != 0)
}

// ---------------------------------------------------------------------------
// Log journal
// ---------------------------------------------------------------------------

pub async fn append_log(pool: &Pool, user_id: i64, level: LogLevel, message: &str) -> Result<LogRecord> {
    let row = sqlx::query(
        "INSERT INTO logs (user_id, level, message, created_at) VALUES (?, ?, ?, ?) \
         RETURNING id, user_id, level, message, created_at",
    )
    .bind(user_id)
    .bind(level.as_str())
    .bind(message)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    log_record_from_row(&row)
}

/// Records with id strictly greater than `since_id`, oldest first.
#[instrument(skip_all, fields(user_id = user_id, since_id = since_id))]
pub async fn logs_since(pool: &Pool, user_id: i64, since_id: i64, limit: i64) -> Result<Vec<LogRecord>> {
    let rows = sqlx::query(
        "SELECT id, user_id, level, message, created_at FROM logs \
         WHERE user_id = ? AND id > ? ORDER BY id ASC LIMIT ?",
    )
    .bind(user_id)
    .bind(since_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(log_record_from_row).collect()
}

// ---------------------------------------------------------------------------
// Daily stats and quota counter
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(user_id = user_id, day = %day))]
pub async fn publishes_on(pool: &Pool, user_id: i64, day: NaiveDate) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT publish_count FROM daily_stats WHERE user_id = ? AND day = ?",
    )
    .bind(user_id)
    .bind(day)
    .fetch_optional(pool)
    .await?;
    Ok(count.unwrap_or(0))
}

#[instrument(skip_all, fields(user_id = user_id, counter = ?counter))]
pub async fn bump_stat(pool: &Pool, user_id: i64, day: NaiveDate, counter: StatCounter) -> Result<()> {
    let col = counter.column();
    sqlx::query(&format!(
        "INSERT INTO daily_stats (user_id, day, {col}) VALUES (?, ?, 1) \
         ON CONFLICT(user_id, day) DO UPDATE SET {col} = {col} + 1",
        col = col
    ))
    .bind(user_id)
    .bind(day)
    .execute(pool)
    .await?;
    Ok(())
}

/// Dense series from `from` to `to` inclusive; days without activity are zero.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn daily_stats(pool: &Pool, user_id: i64, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyStats>> {
    let rows = sqlx::query(
        "SELECT day, publish_count, fetched_count, generated_count FROM daily_stats \
         WHERE user_id = ? AND day >= ? AND day <= ?",
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    let mut by_day = HashMap::new();
    for row in &rows {
        let day: NaiveDate = row.try_get("day")?;
        by_day.insert(
            day,
            DailyStats {
                day,
                publish_count: row.try_get("publish_count")?,
                fetched_count: row.try_get("fetched_count")?,
                generated_count: row.try_get("generated_count")?,
            },
        );
    }
    Ok(from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|d| by_day.remove(&d).unwrap_or_else(|| DailyStats::empty(d)))
        .collect())
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn insert_history_tx(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &QueueEntry,
    reply_text: &str,
    status: HistoryStatus,
    published_id: Option<&str>,
) -> Result<HistoryRecord> {
    let row = sqlx::query(&format!(
        "INSERT INTO history (user_id, item_ref, content_excerpt, reply_text, status, published_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        HISTORY_COLUMNS
    ))
    .bind(entry.user_id)
    .bind(&entry.item_ref)
    .bind(&entry.content_excerpt)
    .bind(reply_text)
    .bind(status.as_str())
    .bind(published_id)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;
    history_from_row(&row)
}

/// Settle a successful publish: history row, quota increment and queue delete
/// commit together.
#[instrument(skip_all, fields(user_id = entry.user_id, id = entry.id))]
pub async fn record_publish(
    pool: &Pool,
    entry: &QueueEntry,
    reply_text: &str,
    published_id: &str,
    day: NaiveDate,
) -> Result<HistoryRecord> {
    let mut tx = pool.begin().await?;
    let record = insert_history_tx(
        &mut tx,
        entry,
        reply_text,
        HistoryStatus::Published,
        Some(published_id),
    )
    .await?;
    sqlx::query(
        "INSERT INTO daily_stats (user_id, day, publish_count) VALUES (?, ?, 1) \
         ON CONFLICT(user_id, day) DO UPDATE SET publish_count = publish_count + 1",
    )
    .bind(entry.user_id)
    .bind(day)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM queue WHERE id = ? AND user_id = ?")
        .bind(entry.id)
        .bind(entry.user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(record)
}

/// Settle a manually posted reply. Returns `None` (and writes nothing) when
/// the entry is gone or a publish currently holds its claim.
#[instrument(skip_all, fields(user_id = entry.user_id, id = entry.id))]
pub async fn record_manual(pool: &Pool, entry: &QueueEntry, reply_text: &str) -> Result<Option<HistoryRecord>> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query("DELETE FROM queue WHERE id = ? AND user_id = ? AND claimed_at IS NULL")
        .bind(entry.id)
        .bind(entry.user_id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }
    let record = insert_history_tx(&mut tx, entry, reply_text, HistoryStatus::Manual, None).await?;
    tx.commit().await?;
    Ok(Some(record))
}

/// Newest first.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn list_history(pool: &Pool, user_id: i64, limit: i64) -> Result<Vec<HistoryRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM history WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        HISTORY_COLUMNS
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(history_from_row).collect()
}

// ---------------------------------------------------------------------------
// Content cache
// ---------------------------------------------------------------------------

pub async fn cached_content(pool: &Pool, item_ref: &str) -> Result<Option<String>> {
    let content = sqlx::query_scalar::<_, String>("SELECT content FROM content_cache WHERE item_ref = ?")
        .bind(item_ref)
        .fetch_optional(pool)
        .await?;
    Ok(content)
}

pub async fn cache_content(pool: &Pool, item_ref: &str, content: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO content_cache (item_ref, content, cached_at) VALUES (?, ?, ?) \
         ON CONFLICT(item_ref) DO UPDATE SET content = excluded.content, cached_at = excluded.cached_at",
    )
    .bind(item_ref)
    .bind(content)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
