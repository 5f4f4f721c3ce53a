//! Rate-limited retry executor wrapping every external call.
use crate::config;
use crate::error::{ExecError, UpstreamError};
use crate::limiter::{Admission, RateLimiter};
use crate::model::OperationClass;
use crate::rotator::{CredentialRotator, CredentialSet};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&config::Retry::default())
    }
}

impl From<&config::Retry> for RetryPolicy {
    fn from(r: &config::Retry) -> Self {
        Self {
            max_attempts: r.max_attempts.max(1),
            base_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            request_timeout: Duration::from_secs(r.request_timeout_secs),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base * 2^retry, capped,
    /// plus up to 10% jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_millis() as u64 / 10;
        let extra = rand::thread_rng().gen_range(0..=spread);
        delay + Duration::from_millis(extra)
    }
}

/// Shared by all runs; built once at startup.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    rotator: Arc<CredentialRotator>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(rotator: Arc<CredentialRotator>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            rotator,
            limiter,
            policy,
        }
    }

    /// Rotator, limiter and policy as configured. The generator key becomes
    /// a one-set `Generate` pool.
    pub fn from_config(cfg: &config::Config) -> Self {
        let rotator = CredentialRotator::from_config(
            &cfg.credentials,
            Duration::from_secs(cfg.retry.cooldown_secs),
        )
        .with_pool(
            OperationClass::Generate,
            [cfg.upstream.generator_api_key.clone()],
        );
        Self::new(
            Arc::new(rotator),
            Arc::new(RateLimiter::from_limits(&cfg.limits)),
            RetryPolicy::from(&cfg.retry),
        )
    }

    pub fn rotator(&self) -> &CredentialRotator {
        &self.rotator
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry budget
    /// is spent.
    ///
    /// Transient failures (including timeouts) count against
    /// `max_attempts` and back off exponentially on the same call. An upstream
    /// rate-limit cools the credential set down and moves straight on to the
    /// next set; those rotations are bounded by the pool size and surface as
    /// `NoCredentialsAvailable` once every set is cooling down.
    pub async fn execute<T, F, Fut>(
        &self,
        class: OperationClass,
        admission: Admission,
        mut attempt: F,
    ) -> Result<T, ExecError>
    where
        F: FnMut(Arc<CredentialSet>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.limiter.admit(class, admission).await?;

        let pool_size = self.rotator.pool_size(class);
        let mut transient_attempts: u32 = 0;
        let mut rotations: usize = 0;

        loop {
            let creds = self.rotator.next(class)?;
            let result = match tokio::time::timeout(self.policy.request_timeout, attempt(Arc::clone(&creds))).await {
                Ok(res) => res,
                Err(_) => Err(UpstreamError::Transient(format!(
                    "timed out after {}s",
                    self.policy.request_timeout.as_secs()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    if transient_attempts > 0 || rotations > 0 {
                        debug!(class = %class, transient_attempts, rotations, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match err {
                UpstreamError::RateLimited { retry_after } => {
                    self.rotator.mark_rate_limited(&creds, retry_after);
                    rotations += 1;
                    if rotations >= pool_size {
                        warn!(class = %class, rotations, ?retry_after, "every credential set rate limited");
                        return Err(ExecError::NoCredentialsAvailable(class));
                    }
                }
                UpstreamError::Transient(msg) => {
                    transient_attempts += 1;
                    if transient_attempts >= self.policy.max_attempts {
                        let last = UpstreamError::Transient(msg);
                        error!(class = %class, attempts = transient_attempts, cause = %last, "retries exhausted");
                        return Err(ExecError::UpstreamFailure {
                            class,
                            attempts: transient_attempts,
                            last,
                        });
                    }
                    let delay = self.policy.backoff(transient_attempts - 1);
                    warn!(
                        class = %class,
                        attempt = transient_attempts,
                        delay_ms = delay.as_millis() as u64,
                        cause = %msg,
                        "transient failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                cause => {
                    debug!(class = %class, cause = %cause, "permanent upstream failure");
                    return Err(ExecError::Permanent { class, cause });
                }
            }
        }
    }
}
