//! Local resolution cache: external key to composite-key token.
//!
//! Entries are hints. The root record in the store stays authoritative, so a
//! stale entry only costs a miss on the field records; deletes must call
//! [`ResolutionCache::invalidate`].

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry {
    token: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Concurrent token cache with a per-entry TTL and a capacity bound.
#[derive(Debug)]
pub struct ResolutionCache {
    entries: DashMap<String, CacheEntry>,
    /// `None` keeps entries until evicted or invalidated
    ttl: Option<Duration>,
    capacity: usize,
}

impl ResolutionCache {
    pub fn new(ttl: Option<Duration>, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.token.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    pub fn set(&self, key: &str, token: &str) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.make_room();
        }
        let entry = CacheEntry {
            token: token.to_string(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries, then an arbitrary one if the cache is still full.
    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        if self.entries.len() < self.capacity {
            return;
        }

        let victim = self.entries.iter().next().map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            trace!(key = %victim, "Evicting resolution cache entry");
            self.entries.remove(&victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_get_invalidate() {
        let cache = ResolutionCache::new(None, 16);
        assert_eq!(cache.get("k"), None);

        cache.set("k", "k_abcdefgh");
        assert_eq!(cache.get("k").as_deref(), Some("k_abcdefgh"));

        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entries_expire() {
        let cache = ResolutionCache::new(Some(Duration::from_millis(50)), 16);
        cache.set("k", "k_abcdefgh");
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bound() {
        let cache = ResolutionCache::new(None, 3);
        for i in 0..10 {
            cache.set(&format!("k{}", i), "t");
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("k9").is_some());

        // Overwriting an existing key never evicts
        cache.set("k9", "t2");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("k9").as_deref(), Some("t2"));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ResolutionCache::new(None, 1024));
        let mut handles = vec![];

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("k{}", i);
                    cache.set(&key, &format!("t{}", t));
                    let _ = cache.get(&key);
                    if i % 10 == 0 {
                        cache.invalidate(&key);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 100);
    }
}
