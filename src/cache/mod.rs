//! Cache collaborator boundary.
//!
//! The engine only sequences calls into a [`Cache`]; storage format and
//! internal locking belong to the implementation. Entries are snapshots:
//! dispatchers read copies and never mutate what the cache owns.

mod headers;
mod memory;

pub use headers::{
    conditional_headers, format_http_date, parse_cache_headers, parse_cache_headers_at,
    parse_charset, parse_http_date, DEFAULT_CHARSET,
};
pub use memory::{MemoryCache, MemoryCacheConfig, NoCache};

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::network::Headers;

/// Cached payload plus freshness metadata.
///
/// `soft_ttl <= ttl` is expected but not enforced.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Bytes,
    pub etag: Option<String>,
    pub server_date: Option<SystemTime>,
    /// Hard expiry: past this instant the entry must not be served.
    pub ttl: SystemTime,
    /// Past this instant the entry is served but refreshed in the background.
    pub soft_ttl: SystemTime,
    pub response_headers: Arc<Headers>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    pub fn refresh_needed(&self) -> bool {
        self.refresh_needed_at(SystemTime::now())
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now > self.ttl
    }

    pub fn refresh_needed_at(&self, now: SystemTime) -> bool {
        now > self.soft_ttl
    }
}

/// Persistent key/value store of cached responses.
///
/// Implementations shared between the cache dispatcher and the network pool
/// must serialize their own state; every method takes `&self`.
pub trait Cache: Send + Sync {
    /// Called once by the cache dispatcher before any lookup. May block.
    fn initialize(&self);

    fn get(&self, key: &str) -> Option<CacheEntry>;

    fn put(&self, key: &str, entry: CacheEntry);

    /// Force a refresh on next use; `full_expire` also drops the stale window.
    fn invalidate(&self, key: &str, full_expire: bool);

    fn remove(&self, key: &str);

    fn clear(&self);
}
