//! In-memory value store using moka.
//!
//! Wraps `moka::future::Cache` so connection tasks can read and write
//! concurrently without a global lock. Entries are weighted by their total
//! blob size and evicted (TinyLFU admission, LRU eviction) once the store
//! exceeds its byte budget.

use std::time::Duration;

use moka::future::Cache as MokaCache;

use crate::key::CacheKey;
use crate::value::CacheValue;

/// Size-bounded store of cache values.
pub struct CacheStorage {
    cache: MokaCache<CacheKey, CacheValue>,
    max_size_bytes: u64,
}

impl CacheStorage {
    /// Create a store holding at most `max_size_bytes` of blob data.
    ///
    /// # Arguments
    ///
    /// * `max_size_bytes` - Byte budget across all values
    /// * `ttl` - Optional time-to-live for entries
    pub fn new(max_size_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = MokaCache::builder()
            .weigher(|_key: &CacheKey, value: &CacheValue| -> u32 {
                // moka weights are u32; saturate for very large values
                value.size().min(u32::MAX as u64) as u32
            })
            .max_capacity(max_size_bytes);

        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            cache: builder.build(),
            max_size_bytes,
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Returns `false` without storing if the value alone exceeds the budget.
    pub async fn insert(&self, key: CacheKey, value: CacheValue) -> bool {
        if value.size() > self.max_size_bytes {
            return false;
        }
        self.cache.insert(key, value).await;
        true
    }

    /// Returns the value stored under `key`.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.cache.get(key).await
    }

    /// Refreshes the recency of `key`; returns whether it is present.
    pub async fn touch(&self, key: &CacheKey) -> bool {
        self.cache.get(key).await.is_some()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Number of stored values (approximate until maintenance runs).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Total weighted size in bytes (approximate until maintenance runs).
    pub fn size_bytes(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// The configured byte budget.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Runs pending eviction and bookkeeping.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}
