//! Batch runs: one per user at a time, items processed strictly in order.
//!
//! `BatchManager` owns the per-user run registry and the state machine
//! (`idle → running → stopping → stopped`). The run itself is a spawned task
//! that checks for a stop request between items only, so an item is never
//! left half-processed.
use crate::clients::{ContentFetcher, ReplyGenerator};
use crate::db::{self, Pool, StatCounter};
use crate::error::{ExecError, StartError};
use crate::executor::RetryExecutor;
use crate::journal::Journal;
use crate::limiter::Admission;
use crate::model::{
    excerpt, extract_item_id, ItemOutcome, NewQueueEntry, OperationClass, RunStatus, Tone,
    EXCERPT_CHARS,
};
use crate::quota::QuotaGate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub items: Vec<String>,
    pub tone: Tone,
    pub payment_proof: Option<Value>,
}

/// Point-in-time view of a user's current (or last) run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSnapshot {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub cursor: usize,
    pub total: usize,
    pub current_item: Option<String>,
    pub queued: usize,
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the run halted on a configuration or storage error.
    pub halted: Option<String>,
}

impl RunSnapshot {
    fn idle() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            cursor: 0,
            total: 0,
            current_item: None,
            queued: 0,
            failed: 0,
            started_at: None,
            halted: None,
        }
    }
}

#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    status: RunStatus,
    items: Vec<String>,
    tone: Tone,
    cursor: usize,
    queued: usize,
    failed: usize,
    started_at: DateTime<Utc>,
    halted: Option<String>,
}

impl RunState {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: Some(self.run_id),
            status: self.status,
            cursor: self.cursor,
            total: self.items.len(),
            current_item: if self.status.is_active() {
                self.items.get(self.cursor).cloned()
            } else {
                None
            },
            queued: self.queued,
            failed: self.failed,
            started_at: Some(self.started_at),
            halted: self.halted.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct RunSlot {
    state: Arc<Mutex<RunState>>,
    cancel: CancellationToken,
    done: CancellationToken,
}

#[derive(Debug, Default)]
struct Registry {
    runs: HashMap<i64, RunSlot>,
    /// Users whose start request is between the slot check and the gate
    /// verdict.
    starting: HashSet<i64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The per-item work: fetch, generate, enqueue.
#[derive(Clone)]
pub struct Pipeline {
    pool: Pool,
    executor: Arc<RetryExecutor>,
    fetcher: Arc<dyn ContentFetcher>,
    generator: Arc<dyn ReplyGenerator>,
    journal: Journal,
    item_pause: Duration,
}

impl Pipeline {
    pub fn new(
        pool: Pool,
        executor: Arc<RetryExecutor>,
        fetcher: Arc<dyn ContentFetcher>,
        generator: Arc<dyn ReplyGenerator>,
        journal: Journal,
    ) -> Self {
        Self {
            pool,
            executor,
            fetcher,
            generator,
            journal,
            item_pause: Duration::ZERO,
        }
    }

    /// Pause between consecutive items; interrupted by a stop request.
    pub fn with_item_pause(mut self, pause: Duration) -> Self {
        self.item_pause = pause;
        self
    }

    async fn bump(&self, user_id: i64, counter: StatCounter) {
        if let Err(e) = db::bump_stat(&self.pool, user_id, Utc::now().date_naive(), counter).await {
            warn!(user_id, error = %e, "failed to update daily stats");
        }
    }

    /// Process one item. Per-item failures come back as an `ItemOutcome`;
    /// `Err` means the run cannot continue.
    #[instrument(skip_all, fields(user_id = user_id, item = %item_url))]
    pub async fn process_item(&self, user_id: i64, item_url: &str, tone: Tone) -> anyhow::Result<ItemOutcome> {
        let Some(item_id) = extract_item_id(item_url) else {
            let reason = format!("no item id in '{}'", item_url);
            self.journal
                .error(user_id, format!("Invalid item: {}", reason))
                .await;
            return Ok(ItemOutcome::InvalidItem { reason });
        };

        if db::item_already_handled(&self.pool, user_id, &item_id).await? {
            let reason = format!("item {} is already queued or answered", item_id);
            self.journal
                .warning(user_id, format!("Skipped: {}", reason))
                .await;
            return Ok(ItemOutcome::Skipped { reason });
        }

        let content = match db::cached_content(&self.pool, &item_id).await? {
            Some(content) => {
                self.journal
                    .info(user_id, format!("Fetched content for {} from cache", item_id))
                    .await;
                content
            }
            None => {
                let fetched = self
                    .executor
                    .execute(OperationClass::Fetch, Admission::Wait, |creds| {
                        let fetcher = Arc::clone(&self.fetcher);
                        let id = item_id.clone();
                        async move { fetcher.fetch(&id, &creds).await }
                    })
                    .await;
                match fetched {
                    Ok(content) => {
                        db::cache_content(&self.pool, &item_id, &content).await?;
                        self.bump(user_id, StatCounter::Fetched).await;
                        self.journal
                            .info(
                                user_id,
                                format!("Fetched content for {} ({} chars)", item_id, content.chars().count()),
                            )
                            .await;
                        content
                    }
                    Err(e) => return self.item_failed(user_id, &item_id, e, true).await,
                }
            }
        };

        let generated = self
            .executor
            .execute(OperationClass::Generate, Admission::Wait, |creds| {
                let generator = Arc::clone(&self.generator);
                let content = content.clone();
                async move { generator.generate(&content, tone, &creds).await }
            })
            .await;
        let reply_text = match generated {
            Ok(text) => {
                self.bump(user_id, StatCounter::Generated).await;
                self.journal
                    .info(user_id, format!("Generated reply for {}", item_id))
                    .await;
                text
            }
            Err(e) => return self.item_failed(user_id, &item_id, e, false).await,
        };

        let entry = db::insert_queue_entry(
            &self.pool,
            user_id,
            &NewQueueEntry {
                item_ref: item_id.clone(),
                content_excerpt: excerpt(&content, EXCERPT_CHARS),
                reply_text,
            },
        )
        .await?;
        self.journal
            .success(user_id, format!("Queued reply for {} for review", item_id))
            .await;
        Ok(ItemOutcome::Success { entry_id: entry.id })
    }

    async fn item_failed(
        &self,
        user_id: i64,
        item_id: &str,
        err: ExecError,
        fetching: bool,
    ) -> anyhow::Result<ItemOutcome> {
        let stage = if fetching { "Fetch" } else { "Generation" };
        self.journal
            .error(
                user_id,
                format!("{} failed for {} ({}): {}", stage, item_id, err.kind(), err),
            )
            .await;
        if err.is_fatal_to_run() {
            return Err(err.into());
        }
        let cause = err.to_string();
        Ok(if fetching {
            ItemOutcome::FetchFailed { cause }
        } else {
            ItemOutcome::GenerateFailed { cause }
        })
    }
}

/// Process-wide registry of batch runs.
#[derive(Clone)]
pub struct BatchManager {
    pipeline: Pipeline,
    quota: Arc<QuotaGate>,
    registry: Arc<Mutex<Registry>>,
}

impl BatchManager {
    pub fn new(pipeline: Pipeline, quota: Arc<QuotaGate>) -> Self {
        Self {
            pipeline,
            quota,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Start a run for `user_id`. Refusals leave any previous run untouched
    /// and nothing is processed.
    #[instrument(skip_all, fields(user_id = user_id))]
    pub async fn start(&self, user_id: i64, request: BatchRequest) -> Result<Uuid, StartError> {
        let items: Vec<String> = request
            .items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() {
            return Err(StartError::Invalid("no items submitted".into()));
        }

        {
            let mut reg = lock(&self.registry);
            let busy = reg.starting.contains(&user_id)
                || reg
                    .runs
                    .get(&user_id)
                    .map_or(false, |slot| lock(&slot.state).status.is_active());
            if busy {
                return Err(StartError::AlreadyRunning);
            }
            reg.starting.insert(user_id);
        }

        let gate = async {
            self.quota.check_and_reserve(user_id).await?;
            self.quota
                .check_payment_gate(user_id, request.payment_proof.as_ref())
                .await
        }
        .await;
        if let Err(refusal) = gate {
            lock(&self.registry).starting.remove(&user_id);
            info!(user_id, reason = %refusal, "batch start refused");
            return Err(refusal.into());
        }

        let run_id = Uuid::new_v4();
        let state = Arc::new(Mutex::new(RunState {
            run_id,
            status: RunStatus::Running,
            items,
            tone: request.tone,
            cursor: 0,
            queued: 0,
            failed: 0,
            started_at: Utc::now(),
            halted: None,
        }));
        let slot = RunSlot {
            state,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        {
            let mut reg = lock(&self.registry);
            reg.starting.remove(&user_id);
            reg.runs.insert(user_id, slot.clone());
        }

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            run_loop(pipeline, user_id, slot).await;
        });
        Ok(run_id)
    }

    /// Ask the active run to stop after its in-flight item. Idempotent; a
    /// no-op when nothing is running.
    pub fn stop(&self, user_id: i64) -> RunSnapshot {
        let slot = lock(&self.registry).runs.get(&user_id).cloned();
        let Some(slot) = slot else {
            return RunSnapshot::idle();
        };
        let mut state = lock(&slot.state);
        if state.status == RunStatus::Running {
            state.status = RunStatus::Stopping;
            slot.cancel.cancel();
            info!(user_id, run_id = %state.run_id, "stop requested");
        }
        state.snapshot()
    }

    pub fn status(&self, user_id: i64) -> RunSnapshot {
        let slot = lock(&self.registry).runs.get(&user_id).cloned();
        slot.map_or_else(RunSnapshot::idle, |slot| lock(&slot.state).snapshot())
    }

    /// Resolves once the user's current run has reached `stopped`.
    pub async fn wait_finished(&self, user_id: i64) {
        let done = lock(&self.registry).runs.get(&user_id).map(|s| s.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Request a stop on every active run.
    pub fn stop_all(&self) {
        let users: Vec<i64> = lock(&self.registry).runs.keys().copied().collect();
        for user_id in users {
            self.stop(user_id);
        }
    }
}

async fn run_loop(pipeline: Pipeline, user_id: i64, slot: RunSlot) {
    let (run_id, total, tone) = {
        let s = lock(&slot.state);
        (s.run_id, s.items.len(), s.tone)
    };
    pipeline
        .journal
        .info(
            user_id,
            format!("Batch started: {} items, {} tone", total, tone.as_str()),
        )
        .await;

    loop {
        let next = {
            let s = lock(&slot.state);
            if s.status != RunStatus::Running || s.cursor >= s.items.len() {
                None
            } else {
                Some((s.cursor, s.items[s.cursor].clone()))
            }
        };
        let Some((index, item)) = next else {
            break;
        };

        pipeline
            .journal
            .info(user_id, format!("Processing item {}/{}: {}", index + 1, total, item))
            .await;
        let outcome = pipeline.process_item(user_id, &item, tone).await;

        let keep_going = {
            let mut s = lock(&slot.state);
            s.cursor += 1;
            match &outcome {
                Ok(o) if o.is_success() => s.queued += 1,
                Ok(ItemOutcome::Skipped { .. }) => {}
                Ok(_) => s.failed += 1,
                Err(e) => {
                    s.failed += 1;
                    s.halted = Some(e.to_string());
                }
            }
            s.halted.is_none() && s.status == RunStatus::Running && s.cursor < s.items.len()
        };
        if let Err(e) = &outcome {
            pipeline
                .journal
                .error(user_id, format!("Batch halted: {}", e))
                .await;
            break;
        }
        if keep_going && !pipeline.item_pause.is_zero() {
            tokio::select! {
                _ = slot.cancel.cancelled() => {}
                _ = tokio::time::sleep(pipeline.item_pause) => {}
            }
        }
    }

    let summary = {
        let mut s = lock(&slot.state);
        let stopped_early = s.status == RunStatus::Stopping;
        s.status = RunStatus::Stopped;
        if stopped_early {
            format!(
                "Batch stopped after {}/{} items: {} queued, {} failed",
                s.cursor, total, s.queued, s.failed
            )
        } else {
            format!(
                "Batch finished: {} queued, {} failed of {} items",
                s.queued, s.failed, total
            )
        }
    };
    info!(user_id, %run_id, "{}", summary);
    pipeline.journal.success(user_id, summary).await;
    slot.done.cancel();
}
