use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use log::{debug, warn};
use std::time::Duration;

use crate::{
    error::StoreError,
    store::{CounterStore, RateLimitKey, RateLimitResult},
};

/// Number of records at which a hit first sweeps expired records out of the map.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// Hit count of one key inside its current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: u64,
    /// End of the window in milliseconds since the Unix epoch.
    pub window_end: i64,
}

impl CounterRecord {
    fn fresh(now: i64, window: Duration) -> Self {
        Self {
            count: 1,
            window_end: now + window.as_millis() as i64,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        now >= self.window_end
    }
}

/// Fixed-window implementation of [`crate::store::CounterStore`] based on dashmap.
///
/// This is the in-process fallback. Its windows start at the first hit of a
/// key instead of the epoch-aligned buckets of the Redis store, and it never
/// fails: a hit is a short critical section on one dashmap shard and never
/// awaits.
///
/// Records are not expired proactively. A record whose window has ended is
/// replaced on its next hit, and once the map holds `sweep_threshold` records
/// every expired record is dropped in one pass.
pub struct MemoryStore {
    records: DashMap<RateLimitKey, CounterRecord>,
    sweep_threshold: usize,
}

impl MemoryStore {
    /*!
    Create a new [`crate::store::MemoryStore`] instance.

    Example:
    ```rust
    use ratelimit_guard::store::MemoryStore;
    use std::sync::Arc;

    let store = Arc::new(MemoryStore::new());
    assert!(store.is_empty());
    ```
    */
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }

    /// Sets the record count that triggers a sweep of expired records.
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold.max(1);
        self
    }

    /// Records one hit for `key` and reports whether it fits into `limit` per `window`.
    pub fn hit(&self, key: &RateLimitKey, limit: u64, window: Duration) -> RateLimitResult {
        let now = chrono::Utc::now().timestamp_millis();

        // Must run before `entry` below: sweeping while holding a shard guard deadlocks.
        if self.records.len() >= self.sweep_threshold {
            self.sweep_at(now);
        }

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = CounterRecord::fresh(now, window);
                    Self::first_hit(limit, record.window_end)
                } else if record.count >= limit {
                    warn!(
                        "Local rate limit exceeded for key({}): count({}) >= limit({})",
                        key, record.count, limit
                    );
                    RateLimitResult {
                        success: false,
                        remaining: 0,
                        reset: record.window_end,
                        limit,
                    }
                } else {
                    record.count += 1;
                    RateLimitResult::from_count(record.count, limit, record.window_end)
                }
            }
            Entry::Vacant(vacant) => {
                let record = vacant.insert(CounterRecord::fresh(now, window));
                Self::first_hit(limit, record.window_end)
            }
        }
    }

    // The first hit of a window is always admitted.
    fn first_hit(limit: u64, window_end: i64) -> RateLimitResult {
        RateLimitResult {
            success: true,
            remaining: limit.saturating_sub(1),
            reset: window_end,
            limit,
        }
    }

    /// Drops every record whose window has ended.
    pub fn sweep(&self) {
        self.sweep_at(chrono::Utc::now().timestamp_millis());
    }

    fn sweep_at(&self, now: i64) {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        debug!(
            "Swept local rate limit records: {} -> {}",
            before,
            self.records.len()
        );
    }

    /// Current record for `key`, expired or not.
    pub fn get(&self, key: &RateLimitKey) -> Option<CounterRecord> {
        self.records.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Equivalent to MemoryStore::new() method.
impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn check_and_increment(
        &self,
        key: &RateLimitKey,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitResult, StoreError> {
        Ok(self.hit(key, limit, window))
    }
}
