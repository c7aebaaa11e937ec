//! Per-call deadlines for counter store access.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, StoreError, StoreResult};

/// Bounds every call on the wrapped store by a fixed timeout.
#[derive(Debug)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: CounterStore> TimeoutStore<S> {
    /// Wrap `inner`, failing any call that takes longer than `timeout`.
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// The configured per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for TimeoutStore<S> {
    async fn batch_get(&self, keys: &[String]) -> StoreResult<Vec<Option<u64>>> {
        self.bounded(self.inner.batch_get(keys)).await
    }

    async fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        self.bounded(self.inner.increment(key, delta)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.bounded(self.inner.expire(key, ttl)).await
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64> {
        self.bounded(self.inner.increment_with_expiry(key, delta, ttl))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Never answers.
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn batch_get(&self, _keys: &[String]) -> StoreResult<Vec<Option<u64>>> {
            std::future::pending().await
        }

        async fn increment(&self, _key: &str, _delta: u64) -> StoreResult<u64> {
            std::future::pending().await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_fast_calls_pass_through() {
        let store = TimeoutStore::new(MemoryStore::new(), Duration::from_millis(50));
        assert_eq!(store.increment("k", 2).await.unwrap(), 2);
        assert_eq!(
            store.batch_get(&["k".to_string()]).await.unwrap(),
            vec![Some(2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_calls_time_out() {
        let store = TimeoutStore::new(HangingStore, Duration::from_millis(50));

        let read = store.batch_get(&["k".to_string()]).await;
        assert!(matches!(read, Err(StoreError::Timeout(t)) if t == Duration::from_millis(50)));

        let write = store
            .increment_with_expiry("k", 1, Duration::from_secs(120))
            .await;
        assert!(matches!(write, Err(StoreError::Timeout(_))));
    }
}
