//! Round-robin credential rotation shared by every batch run in the process.
//!
//! One `CredentialRotator` is built at startup from configuration and handed
//! to the executor behind an `Arc`. Each operation class owns an independent
//! pool guarded by its own mutex; advancing the counter and reading or setting
//! a cooldown all happen inside that one critical section.
use crate::config::Credentials;
use crate::error::ExecError;
use crate::model::OperationClass;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// One account's key for one operation class.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub class: OperationClass,
    pub index: usize,
    token: String,
}

impl CredentialSet {
    pub fn new(class: OperationClass, index: usize, token: impl Into<String>) -> Self {
        Self {
            class,
            index,
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("class", &self.class)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Pool {
    sets: Vec<Arc<CredentialSet>>,
    disabled_until: Vec<Option<Instant>>,
    counter: u64,
}

#[derive(Debug)]
pub struct CredentialRotator {
    pools: HashMap<OperationClass, Mutex<Pool>>,
    default_cooldown: Duration,
}

impl CredentialRotator {
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            pools: HashMap::new(),
            default_cooldown,
        }
    }

    pub fn from_config(credentials: &Credentials, default_cooldown: Duration) -> Self {
        Self::new(default_cooldown)
            .with_pool(
                OperationClass::Fetch,
                credentials.fetch.iter().map(|c| c.bearer_token.clone()),
            )
            .with_pool(
                OperationClass::Publish,
                credentials.publish.iter().map(|c| c.access_token.clone()),
            )
    }

    pub fn with_pool<I, S>(mut self, class: OperationClass, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sets: Vec<Arc<CredentialSet>> = tokens
            .into_iter()
            .enumerate()
            .map(|(index, token)| Arc::new(CredentialSet::new(class, index, token)))
            .collect();
        let disabled_until = vec![None; sets.len()];
        self.pools.insert(
            class,
            Mutex::new(Pool {
                sets,
                disabled_until,
                counter: 0,
            }),
        );
        self
    }

    pub fn pool_size(&self, class: OperationClass) -> usize {
        self.pools
            .get(&class)
            .map(|p| lock(p).sets.len())
            .unwrap_or(0)
    }

    /// Number of sets not currently cooling down.
    pub fn available(&self, class: OperationClass) -> usize {
        let Some(pool) = self.pools.get(&class) else {
            return 0;
        };
        let now = Instant::now();
        lock(pool)
            .disabled_until
            .iter()
            .filter(|d| d.map_or(true, |until| until <= now))
            .count()
    }

    /// Next enabled set for `class`, round-robin.
    pub fn next(&self, class: OperationClass) -> Result<Arc<CredentialSet>, ExecError> {
        let pool = self.pools.get(&class).ok_or(ExecError::PoolEmpty(class))?;
        let mut pool = lock(pool);
        let size = pool.sets.len();
        if size == 0 {
            return Err(ExecError::PoolEmpty(class));
        }
        let now = Instant::now();
        for _ in 0..size {
            let idx = (pool.counter % size as u64) as usize;
            pool.counter = pool.counter.wrapping_add(1);
            match pool.disabled_until[idx] {
                Some(until) if until > now => continue,
                Some(_) => pool.disabled_until[idx] = None,
                None => {}
            }
            return Ok(Arc::clone(&pool.sets[idx]));
        }
        Err(ExecError::NoCredentialsAvailable(class))
    }

    /// Cool `set` down for `retry_after`, or the default cooldown when the
    /// upstream gave no hint.
    pub fn mark_rate_limited(&self, set: &CredentialSet, retry_after: Option<Duration>) {
        let Some(pool) = self.pools.get(&set.class) else {
            return;
        };
        let cooldown = retry_after.unwrap_or(self.default_cooldown);
        let until = Instant::now() + cooldown;
        let mut pool = lock(pool);
        if let Some(slot) = pool.disabled_until.get_mut(set.index) {
            // Keep the later deadline if two callers report the same set.
            *slot = Some(slot.map_or(until, |prev| prev.max(until)));
            warn!(
                class = %set.class,
                index = set.index,
                cooldown_secs = cooldown.as_secs(),
                "credential set rate limited"
            );
        }
    }
}

fn lock(pool: &Mutex<Pool>) -> std::sync::MutexGuard<'_, Pool> {
    // A panic while holding the guard cannot leave the pool half-updated.
    pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
