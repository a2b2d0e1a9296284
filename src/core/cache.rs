//! LRU cache for verified capability grants
//!
//! Keyed by the raw token string. Only successfully verified grants are stored, and a
//! grant is dropped the first time it is looked up at or after its expiry, so a cached
//! entry never outlives the token it came from.

use super::credential::CapabilityGrant;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Shared cache of verified grants
pub struct GrantCache {
    cache: Mutex<LruCache<String, CapabilityGrant>>,
}

impl GrantCache {
    /// Create a cache holding at most `capacity` grants
    ///
    /// Returns `None` for a zero capacity, which disables caching.
    pub fn new(capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(GrantCache {
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Cached grant for this token, if present and still valid at `now`
    pub fn get(&self, token: &str, now: i64) -> Option<CapabilityGrant> {
        let mut cache = self.cache.lock();
        let expired = cache.get(token)?.is_expired_at(now);
        if expired {
            cache.pop(token);
            return None;
        }
        cache.get(token).cloned()
    }

    /// Store a verified grant
    ///
    /// Grants already expired at `now` are not stored.
    pub fn put(&self, token: &str, grant: &CapabilityGrant, now: i64) {
        if grant.is_expired_at(now) {
            return;
        }
        self.cache.lock().put(token.to_string(), grant.clone());
    }

    /// Drop every cached grant
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached grants
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}
