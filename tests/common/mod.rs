#![allow(dead_code)]

use async_trait::async_trait;
use reply_agent::actions::QueueActions;
use reply_agent::clients::{ContentFetcher, PaymentVerifier, Publisher, ReplyGenerator};
use reply_agent::db::{self, Pool};
use reply_agent::error::UpstreamError;
use reply_agent::executor::{RetryExecutor, RetryPolicy};
use reply_agent::journal::Journal;
use reply_agent::limiter::RateLimiter;
use reply_agent::model::{LogLevel, LogRecord, OperationClass, Tone};
use reply_agent::pipeline::{BatchManager, Pipeline};
use reply_agent::quota::{PaymentGate, QuotaGate};
use reply_agent::rotator::{CredentialRotator, CredentialSet};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const USER: i64 = 1;

pub async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn url(id: u64) -> String {
    format!("https://x.com/someone/status/{}", id)
}

/// Content per item id; unknown ids return `content of <id>`.
#[derive(Default)]
pub struct RecordingFetcher {
    pub responses: Mutex<HashMap<String, VecDeque<Result<String, UpstreamError>>>>,
    pub calls: Mutex<Vec<(String, usize)>>,
    pub delay: Duration,
}

impl RecordingFetcher {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub async fn script(&self, item_id: &str, responses: Vec<Result<String, UpstreamError>>) {
        self.responses
            .lock()
            .await
            .insert(item_id.to_string(), responses.into());
    }

    pub async fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ContentFetcher for RecordingFetcher {
    async fn fetch(&self, item_id: &str, creds: &CredentialSet) -> Result<String, UpstreamError> {
        self.calls.lock().await.push((item_id.to_string(), creds.index));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .responses
            .lock()
            .await
            .get_mut(item_id)
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| Ok(format!("content of {}", item_id)))
    }
}

#[derive(Default)]
pub struct RecordingGenerator {
    pub responses: Mutex<VecDeque<Result<String, UpstreamError>>>,
    pub calls: Mutex<Vec<(String, Tone)>>,
}

impl RecordingGenerator {
    pub async fn calls(&self) -> Vec<(String, Tone)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ReplyGenerator for RecordingGenerator {
    async fn generate(&self, content: &str, tone: Tone, _creds: &CredentialSet) -> Result<String, UpstreamError> {
        self.calls.lock().await.push((content.to_string(), tone));
        let scripted = self.responses.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(format!("reply to {}", content)))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub responses: Mutex<VecDeque<Result<String, UpstreamError>>>,
    pub calls: Mutex<Vec<(String, String)>>,
    pub delay: Duration,
}

impl RecordingPublisher {
    pub fn with_responses(responses: Vec<Result<String, UpstreamError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, reply_text: &str, item_id: &str, _creds: &CredentialSet) -> Result<String, UpstreamError> {
        let n = {
            let mut calls = self.calls.lock().await;
            calls.push((reply_text.to_string(), item_id.to_string()));
            calls.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.responses.lock().await.pop_front();
        scripted.unwrap_or_else(|| Ok(format!("published-{}", n)))
    }
}

pub struct FixedVerifier(pub bool);

#[async_trait]
impl PaymentVerifier for FixedVerifier {
    async fn verify(&self, _proof: &Value, _requirements: &Value) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        jitter: false,
    }
}

pub fn rotator() -> CredentialRotator {
    CredentialRotator::new(Duration::from_secs(900))
        .with_pool(OperationClass::Fetch, ["fetch-0", "fetch-1"])
        .with_pool(OperationClass::Generate, ["gen-0"])
        .with_pool(OperationClass::Publish, ["pub-0"])
}

pub struct Harness {
    pub pool: Pool,
    pub fetcher: Arc<RecordingFetcher>,
    pub generator: Arc<RecordingGenerator>,
    pub publisher: Arc<RecordingPublisher>,
    pub quota: Arc<QuotaGate>,
    pub batches: BatchManager,
    pub actions: QueueActions,
    pub journal: Journal,
}

pub struct HarnessBuilder {
    fetcher: RecordingFetcher,
    publisher: RecordingPublisher,
    rotator: CredentialRotator,
    cap: i64,
    payment: Option<(bool, Value)>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            fetcher: RecordingFetcher::default(),
            publisher: RecordingPublisher::default(),
            rotator: rotator(),
            cap: 50,
            payment: None,
        }
    }
}

impl HarnessBuilder {
    pub fn fetcher(mut self, fetcher: RecordingFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn publisher(mut self, publisher: RecordingPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn rotator(mut self, rotator: CredentialRotator) -> Self {
        self.rotator = rotator;
        self
    }

    pub fn cap(mut self, cap: i64) -> Self {
        self.cap = cap;
        self
    }

    pub fn payment(mut self, accepts: bool, requirements: Value) -> Self {
        self.payment = Some((accepts, requirements));
        self
    }

    pub async fn build(self) -> Harness {
        let pool = setup_pool().await;
        let fetcher = Arc::new(self.fetcher);
        let generator = Arc::new(RecordingGenerator::default());
        let publisher = Arc::new(self.publisher);
        let executor = Arc::new(RetryExecutor::new(
            Arc::new(self.rotator),
            Arc::new(RateLimiter::new()),
            fast_policy(),
        ));
        let journal = Journal::new(pool.clone());
        let mut quota = QuotaGate::new(pool.clone(), self.cap);
        if let Some((accepts, requirements)) = self.payment {
            quota = quota.with_payment(PaymentGate::new(Arc::new(FixedVerifier(accepts)), requirements));
        }
        let quota = Arc::new(quota);

        let pipeline = Pipeline::new(
            pool.clone(),
            Arc::clone(&executor),
            fetcher.clone(),
            generator.clone(),
            journal.clone(),
        );
        let batches = BatchManager::new(pipeline, Arc::clone(&quota));
        let actions = QueueActions::new(
            pool.clone(),
            executor,
            publisher.clone(),
            Arc::clone(&quota),
            journal.clone(),
        );
        Harness {
            pool,
            fetcher,
            generator,
            publisher,
            quota,
            batches,
            actions,
            journal,
        }
    }
}

impl Harness {
    pub async fn logs(&self, user_id: i64) -> Vec<LogRecord> {
        self.journal.since(user_id, 0, 10_000).await.unwrap()
    }

    pub async fn logs_at(&self, user_id: i64, level: LogLevel) -> Vec<String> {
        self.logs(user_id)
            .await
            .into_iter()
            .filter(|r| r.level == level)
            .map(|r| r.message)
            .collect()
    }
}
