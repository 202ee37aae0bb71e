//! Opt-in cross-request cache of broker-issued scoped tokens.
//!
//! Entries are keyed by `(principal, resource)` and expire after a fixed TTL
//! that must not exceed the broker's token validity. A disabled or empty cache
//! only costs a re-fetch; correctness never depends on a hit.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 1_024;

type CacheKey = (String, String);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct ScopedTokenCache {
    ttl: Duration,
    entries: Mutex<LruCache<CacheKey, CachedToken>>,
}

impl std::fmt::Debug for ScopedTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTokenCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ScopedTokenCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, principal: &str, resource: &str) -> Option<String> {
        self.get_at(principal, resource, Instant::now())
    }

    pub fn insert(&self, principal: &str, resource: &str, token: String) {
        self.insert_at(principal, resource, token, Instant::now());
    }

    pub fn get_at(&self, principal: &str, resource: &str, now: Instant) -> Option<String> {
        let mut entries = self.entries.lock().ok()?;
        let key = (principal.to_string(), resource.to_string());
        let cached = entries
            .get(&key)
            .map(|entry| (entry.expires_at > now, entry.token.clone()));
        match cached {
            Some((true, token)) => Some(token),
            Some((false, _)) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert_at(&self, principal: &str, resource: &str, token: String, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                (principal.to_string(), resource.to_string()),
                CachedToken {
                    token,
                    expires_at: now + self.ttl,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
