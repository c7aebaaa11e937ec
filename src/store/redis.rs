//! Redis-backed counter store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{info, trace};

use super::{CounterStore, StoreError, StoreResult};

/// A counter store shared through Redis.
///
/// Holds a fixed set of [`ConnectionManager`]s and hands them out round-robin.
/// Each manager multiplexes requests and reconnects on its own after a
/// connection failure.
pub struct RedisStore {
    connection_managers: Arc<Vec<ConnectionManager>>,
    next: AtomicUsize,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connections", &self.connection_managers.len())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, connection_count: usize) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let store = Self::from_client(client, connection_count).await?;
        info!(
            connections = connection_count,
            "Connected counter store to Redis"
        );
        Ok(store)
    }

    /// Create a store with `connection_count` managers for `client`.
    pub async fn from_client(client: Client, connection_count: usize) -> StoreResult<Self> {
        if connection_count == 0 {
            return Err(StoreError::Unavailable(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            next: AtomicUsize::new(0),
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            connection_managers: self.connection_managers.clone(),
            next: AtomicUsize::new(0),
        }
    }
}

fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn batch_get(&self, keys: &[String]) -> StoreResult<Vec<Option<u64>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection();
        let values: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;

        trace!(keys = ?keys, values = ?values, "MGET");
        Ok(values)
    }

    async fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        let mut conn = self.connection();
        let count: u64 = conn.incr(key, delta).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection();
        let _: () = conn.expire(key, ttl_seconds(ttl)).await?;
        Ok(())
    }

    /// INCRBY and EXPIRE in a single MULTI/EXEC round trip.
    async fn increment_with_expiry(
        &self,
        key: &str,
        delta: u64,
        ttl: Duration,
    ) -> StoreResult<u64> {
        let mut conn = self.connection();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, delta)
            .expire(key, ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}
