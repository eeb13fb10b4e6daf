//! Per-key rate limiting over the usage ledger.
//!
//! # Algorithm
//!
//! A sliding window counter: on every check, count the key's ledger records
//! in the trailing hour and compare against the key's hourly allowance.
//! A request is admitted only while `used < limit`.
//!
//! # Admission
//!
//! Counting the ledger and appending to it happen far apart (the AI call sits
//! in between), so two concurrent requests could both see `limit - 1`. To
//! prevent that, checks for one key are serialized by a per-key lock and every
//! admitted request holds a reservation until its usage record is written.
//! `used` is therefore `ledger count + reservations`.
//!
//! Between the ledger insert and the reservation drop a request is counted
//! twice, which can only reject early, never admit past the limit.

use crate::{db::DbPool, error::AppError, models::api_key::ApiKey, services::usage_ledger};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Source of ledger counts.
///
/// Implemented for the database pool; tests supply an in-memory ledger.
pub trait UsageCounter {
    fn count_since(
        &self,
        api_key_id: Uuid,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

impl UsageCounter for DbPool {
    fn count_since(
        &self,
        api_key_id: Uuid,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, AppError>> + Send {
        usage_ledger::count_since(self, api_key_id, since)
    }
}

#[derive(Default)]
struct KeySlot {
    gate: tokio::sync::Mutex<()>,
    reserved: AtomicI64,
}

/// Sliding window limiter shared by all gateway handlers.
pub struct RateLimiter {
    window: Duration,
    slots: Mutex<HashMap<Uuid, Arc<KeySlot>>>,
}

/// Proof that a request was admitted.
///
/// Holds a reservation against the key's allowance. Drop it once the usage
/// record for the request has been written.
pub struct Admission {
    slot: Arc<KeySlot>,
    limit: i64,
    remaining: i64,
}

impl Admission {
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Requests left in the window after this one.
    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.slot.reserved.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("limit", &self.limit)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request from `key` right now.
    pub async fn check_and_admit<C: UsageCounter>(
        &self,
        counter: &C,
        key: &ApiKey,
    ) -> Result<Admission, AppError> {
        self.check_and_admit_at(counter, key.id, key.requests_per_hour(), Utc::now())
            .await
    }

    /// Admit or reject a request against `limit` as of `now`.
    ///
    /// # Errors
    ///
    /// - `RateLimited` when `ledger count + reservations >= limit`
    /// - whatever the counter returns
    pub async fn check_and_admit_at<C: UsageCounter>(
        &self,
        counter: &C,
        api_key_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Admission, AppError> {
        let slot = self.slot(api_key_id);
        let _gate = slot.gate.lock().await;

        let recorded = counter.count_since(api_key_id, now - self.window).await?;
        let used = recorded + slot.reserved.load(Ordering::SeqCst);

        if used >= limit {
            tracing::warn!(
                api_key_id = %api_key_id,
                used,
                limit,
                "API key rate limit exceeded"
            );
            return Err(AppError::RateLimited);
        }

        slot.reserved.fetch_add(1, Ordering::SeqCst);

        Ok(Admission {
            slot: Arc::clone(&slot),
            limit,
            remaining: limit - used - 1,
        })
    }

    fn slot(&self, api_key_id: Uuid) -> Arc<KeySlot> {
        // Poisoning only means another thread panicked mid-insert; the map is still usable.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&api_key_id) {
            return Arc::clone(slot);
        }

        // A slot only the map references has no check running and no admission
        // outstanding. Clones are only taken under this lock, so it is safe to drop.
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);

        let slot = Arc::new(KeySlot::default());
        slots.insert(api_key_id, Arc::clone(&slot));
        slot
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
