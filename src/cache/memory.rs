//! In-process cache implementations.
//!
//! Uses DashMap so the cache dispatcher and the network pool can share one
//! instance without a global lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;

use super::{Cache, CacheEntry};

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_entries: 1024 }
    }
}

/// Bounded concurrent cache. At capacity, the entry that went stale first
/// is evicted.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    config: MemoryCacheConfig,
    initialized: AtomicBool,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries),
            config,
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether [`Cache::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.soft_ttl)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            tracing::trace!(cache_key = %key, "evicting cache entry");
            self.entries.remove(&key);
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl Cache for MemoryCache {
    fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn put(&self, key: &str, entry: CacheEntry) {
        if self.config.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(key) {
            self.evict_oldest();
        }
        self.entries.insert(key.to_string(), entry);
    }

    fn invalidate(&self, key: &str, full_expire: bool) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.soft_ttl = SystemTime::UNIX_EPOCH;
            if full_expire {
                entry.ttl = SystemTime::UNIX_EPOCH;
            }
        }
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Cache that stores nothing. Every lookup is a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl Cache for NoCache {
    fn initialize(&self) {}

    fn get(&self, _key: &str) -> Option<CacheEntry> {
        None
    }

    fn put(&self, _key: &str, _entry: CacheEntry) {}

    fn invalidate(&self, _key: &str, _full_expire: bool) {}

    fn remove(&self, _key: &str) {}

    fn clear(&self) {}
}
