//! Counter store boundary.
//!
//! All shared rate limit state lives behind the [`CounterStore`] trait. The
//! limiter needs three things from a store: a batched read, an atomic
//! increment and a per-key expiry.

mod memory;
mod redis;
mod timeout;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::timeout::TimeoutStore;

/// Errors raised at the counter store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for counter store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A shared key-value store of integer counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read several counters in one round trip.
    ///
    /// The result is aligned with `keys`; absent keys read as `None`.
    async fn batch_get(&self, keys: &[String]) -> StoreResult<Vec<Option<u64>>>;

    /// Atomically add `delta` to a counter, creating it at zero if absent.
    async fn increment(&self, key: &str, delta: u64) -> StoreResult<u64>;

    /// Set or refresh a counter's time to live.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

    /// Increment and then refresh the expiry.
    ///
    /// A key briefly left without a TTL is only retained longer than needed,
    /// it is never miscounted.
    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let count = self.increment(key, delta).await?;
        self.expire(key, ttl).await?;
        Ok(count)
    }
}
