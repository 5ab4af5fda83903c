//! Bounded TTL + LRU cache of finished searches
//!
//! Keyed by the fingerprint of normalized `SearchParams`. Lives for the
//! process lifetime and is shared by every worker.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

use crate::CacheConfig;
use crate::model::FlightResult;

pub struct SearchCache {
    inner: Cache<String, Vec<FlightResult>>,
}

impl SearchCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(|key, _, cause| {
                debug!(key = %key, ?cause, "Search cache entry removed");
            })
            .build();
        Self { inner }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// Cached results for `key`, or `None` when absent or expired
    pub fn get(&self, key: &str) -> Option<Vec<FlightResult>> {
        self.inner.get(key)
    }

    pub fn put(&self, key: impl Into<String>, results: Vec<FlightResult>) {
        self.inner.insert(key.into(), results);
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
    }

    /// Live entries, after applying pending evictions
    pub fn len(&self) -> usize {
        self.inner.run_pending_tasks();
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
