//! Sliding-window rate limiter.
//!
//! The trailing-minute request count is approximated from two adjacent fixed
//! windows: the current window's count plus the previous window's count
//! weighted by how much of the previous window still overlaps the trailing
//! minute. Each scope/endpoint pair costs at most two counters in the store.
//!
//! The read and the increment are separate store calls. Requests racing on the
//! same key may all read the same count and all be admitted, so admitted
//! traffic can overshoot the limit by the number of concurrent racers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::key::{CounterKey, Scope};
use super::policy::Policy;
use super::window::{WindowPosition, COUNTER_TTL};
use crate::store::{CounterStore, StoreResult};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Effective limit applied
    pub limit: u64,
    /// Estimated capacity left
    pub remaining: u64,
    /// Unix seconds at which the current window closes
    pub reset_at: i64,
    /// Seconds the caller should wait, set only on rejection
    pub retry_after_secs: Option<u64>,
}

/// Continuous estimate of requests in the trailing window.
pub fn sliding_count(current: u64, previous: u64, elapsed_fraction: f64) -> f64 {
    current as f64 + previous as f64 * (1.0 - elapsed_fraction)
}

/// A sliding-window limiter over a shared counter store.
///
/// The limiter holds no counters itself and can be cloned freely.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
    policy: Policy,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("policy", &self.policy)
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Create a limiter applying `policy` against `store`.
    ///
    /// An unusable policy is sanitized first, so a zero rate never turns into
    /// a limiter that rejects everything.
    pub fn new(store: Arc<dyn CounterStore>, policy: Policy) -> Self {
        let policy = if policy.is_usable() {
            policy
        } else {
            policy.sanitize("limiter", 1)
        };
        Self { store, policy }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Check and, if admitted, record one request from `scope` to `endpoint`.
    ///
    /// Read failures count as zero. Write failures are returned so the caller
    /// can decide how to degrade.
    pub async fn check(
        &self,
        scope: &Scope,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Decision> {
        let key = CounterKey::new(&self.policy.key_prefix, scope.clone(), endpoint);
        let position = WindowPosition::at(now);
        let current_key = key.for_window(position.start);
        let previous_key = key.for_window(position.previous_start);

        let (current, previous) = self.read_counts(&current_key, &previous_key).await;

        let estimate = sliding_count(current, previous, position.elapsed_fraction);
        let limit = self.policy.limit();

        trace!(
            key = %key,
            current = current,
            previous = previous,
            elapsed_fraction = position.elapsed_fraction,
            estimate = estimate,
            limit = limit,
            "Checking sliding window"
        );

        if estimate < limit as f64 {
            self.store
                .increment_with_expiry(&current_key, 1, COUNTER_TTL)
                .await?;

            let remaining = (limit as f64 - estimate - 1.0).floor().max(0.0) as u64;
            return Ok(Decision {
                allowed: true,
                limit,
                remaining,
                reset_at: position.reset_at,
                retry_after_secs: None,
            });
        }

        let retry_after_secs = (position.until_reset.ceil() as u64).max(1);
        debug!(
            key = %key,
            estimate = estimate,
            limit = limit,
            retry_after_secs = retry_after_secs,
            "Rate limit exceeded"
        );

        Ok(Decision {
            allowed: false,
            limit,
            remaining: 0,
            reset_at: position.reset_at,
            retry_after_secs: Some(retry_after_secs),
        })
    }

    async fn read_counts(&self, current_key: &str, previous_key: &str) -> (u64, u64) {
        let keys = [current_key.to_string(), previous_key.to_string()];
        match self.store.batch_get(&keys).await {
            Ok(values) => {
                let current = values.first().copied().flatten().unwrap_or(0);
                let previous = values.get(1).copied().flatten().unwrap_or(0);
                (current, previous)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    key = current_key,
                    "Counter read failed, treating counts as zero"
                );
                (0, 0)
            }
        }
    }
}
