//! Local token buckets, one per operation class.
use crate::config::{Bucket, Limits};
use crate::error::ExecError;
use crate::model::OperationClass;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// How a caller behaves when the bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queue until a token is available (batch pipeline).
    Wait,
    /// Return `RateLimitExceeded` immediately (direct API callers).
    FailFast,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(bucket: Bucket) -> Self {
        Self {
            capacity: bucket.capacity as f64,
            tokens: bucket.capacity as f64,
            per_sec: bucket.refill_per_minute as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / self.per_sec))
    }
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<OperationClass, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new()
            .with_bucket(OperationClass::Fetch, limits.fetch)
            .with_bucket(OperationClass::Generate, limits.generate)
            .with_bucket(OperationClass::Publish, limits.publish)
    }

    pub fn with_bucket(mut self, class: OperationClass, bucket: Bucket) -> Self {
        self.buckets.insert(class, Mutex::new(TokenBucket::new(bucket)));
        self
    }

    fn take(&self, class: OperationClass) -> Result<(), Duration> {
        match self.buckets.get(&class) {
            Some(bucket) => bucket
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(Instant::now()),
            None => Ok(()),
        }
    }

    pub fn try_acquire(&self, class: OperationClass) -> Result<(), ExecError> {
        self.take(class)
            .map_err(|_| ExecError::RateLimitExceeded(class))
    }

    /// Wait until a token for `class` can be taken.
    pub async fn acquire(&self, class: OperationClass) {
        while let Err(wait) = self.take(class) {
            tracing::debug!(class = %class, wait_ms = wait.as_millis() as u64, "waiting for rate limit token");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn admit(&self, class: OperationClass, admission: Admission) -> Result<(), ExecError> {
        match admission {
            Admission::Wait => {
                self.acquire(class).await;
                Ok(())
            }
            Admission::FailFast => self.try_acquire(class),
        }
    }
}
