//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::{CounterStore, StoreResult};
use crate::ratelimit::{Clock, SystemClock, WINDOW};

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// A counter store held in process memory.
///
/// Counters are only shared between gates of the same process, so this store
/// suits single-instance deployments and tests. Expired counters read as
/// absent. Writes sweep every expired counter at most once per sweep interval,
/// so keys of windows that are never read again do not accumulate.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    sweep_interval: chrono::Duration,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store that evaluates expiry against the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that evaluates expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval: to_chrono(WINDOW),
            last_sweep: Mutex::new(now),
        }
    }

    /// Set how often writes sweep expired counters.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = to_chrono(interval);
        self
    }

    /// Read one counter.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        let entry = *self.entries.get(key)?;
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.count)
    }

    /// Remaining time to live of a counter, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let expires_at = self.entries.get(key)?.expires_at?;
        (expires_at - now).to_std().ok()
    }

    /// Drop every expired counter.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired counters");
        }
        purged
    }

    fn sweep_if_due(&self, now: DateTime<Utc>) {
        {
            let mut last_sweep = self.last_sweep.lock();
            if now - *last_sweep < self.sweep_interval {
                return;
            }
            *last_sweep = now;
        }
        self.purge_expired();
    }

    /// Number of stored counters, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no counters are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn batch_get(&self, keys: &[String]) -> StoreResult<Vec<Option<u64>>> {
        Ok(keys.iter().map(|key| self.get(key)).collect())
    }

    async fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        let now = self.clock.now();
        // Sweep before taking the entry guard, `retain` locks every shard.
        self.sweep_if_due(now);

        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                count: 0,
                expires_at: None,
            };
        }
        entry.count = entry.count.saturating_add(delta);
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = now.checked_add_signed(to_chrono(ttl));
        }
        Ok(())
    }
}
