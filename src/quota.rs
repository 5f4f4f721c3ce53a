//! Daily publish cap and the optional payment gate in front of batch runs.
use crate::clients::PaymentVerifier;
use crate::db::{self, Pool};
use crate::error::GateError;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PaymentGate {
    verifier: Arc<dyn PaymentVerifier>,
    requirements: Value,
}

impl PaymentGate {
    pub fn new(verifier: Arc<dyn PaymentVerifier>, requirements: Value) -> Self {
        Self {
            verifier,
            requirements,
        }
    }
}

pub struct QuotaGate {
    pool: Pool,
    cap: i64,
    payment: Option<PaymentGate>,
    publish_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate")
            .field("cap", &self.cap)
            .field("payment_gate", &self.payment.is_some())
            .finish_non_exhaustive()
    }
}

impl QuotaGate {
    pub fn new(pool: Pool, cap: i64) -> Self {
        Self {
            pool,
            cap,
            payment: None,
            publish_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_payment(mut self, gate: PaymentGate) -> Self {
        self.payment = Some(gate);
        self
    }

    pub fn cap(&self) -> i64 {
        self.cap
    }

    /// Refuse when today's publish count for the user has reached the cap.
    /// Nothing is consumed; the counter moves only when a publish succeeds.
    pub async fn check_and_reserve(&self, user_id: i64) -> Result<i64, GateError> {
        self.check_and_reserve_on(user_id, Utc::now().date_naive()).await
    }

    /// Same as [`check_and_reserve`](Self::check_and_reserve) for an explicit
    /// calendar day. Returns the publishes still available that day.
    pub async fn check_and_reserve_on(&self, user_id: i64, day: NaiveDate) -> Result<i64, GateError> {
        let used = db::publishes_on(&self.pool, user_id, day).await?;
        if used >= self.cap {
            debug!(user_id, used, cap = self.cap, "publish quota exhausted");
            return Err(GateError::QuotaExceeded { used, cap: self.cap });
        }
        Ok(self.cap - used)
    }

    /// Passes when no gate is configured or the verifier accepts `proof`.
    pub async fn check_payment_gate(&self, user_id: i64, proof: Option<&Value>) -> Result<(), GateError> {
        let Some(gate) = &self.payment else {
            return Ok(());
        };
        let required = || GateError::PaymentRequired {
            requirements: gate.requirements.clone(),
        };
        let Some(proof) = proof else {
            return Err(required());
        };
        match gate.verifier.verify(proof, &gate.requirements).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(required()),
            Err(e) => {
                warn!(user_id, error = %e, "payment verification failed");
                Err(required())
            }
        }
    }

    /// Serialises publishes for one user so that the quota check, the
    /// publish call and the counter increment cannot interleave with another
    /// approval by the same user.
    pub async fn publish_permit(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .publish_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(user_id).or_default())
        };
        lock.lock_owned().await
    }
}
