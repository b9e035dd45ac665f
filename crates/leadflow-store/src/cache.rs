//! Read-through hot cache using [`moka`].
//!
//! [`HotCache`] keeps recently used values in a bounded, time-limited
//! concurrent cache and counts hits and misses.  The SQLite store puts one
//! in front of its conversation table.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from the cache; `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} rate={:.1}%",
            self.hits(),
            self.misses(),
            self.hit_rate() * 100.0
        )
    }
}

/// Sizing of a [`HotCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// A named, typed cache with statistics.  Clones share entries and stats.
#[derive(Clone)]
pub struct HotCache<K, V> {
    name: &'static str,
    entries: Cache<K, V>,
    stats: Arc<CacheStats>,
}

impl<K, V> HotCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        debug!(
            cache = name,
            max_entries = config.max_entries,
            ttl_secs = config.ttl.as_secs(),
            "hot cache created"
        );
        Self {
            name,
            entries: Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.ttl)
                .build(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let found = self.entries.get(key).await;
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.invalidate(key).await;
        debug!(cache = self.name, "entry invalidated");
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> HotCache<String, u32> {
        HotCache::new("test", CacheConfig::default())
    }

    #[tokio::test]
    async fn counts_hits_and_misses() {
        let cache = cache();
        assert_eq!(cache.get(&"a".to_string()).await, None);
        cache.insert("a".to_string(), 7).await;
        assert_eq!(cache.get(&"a".to_string()).await, Some(7));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let cache = cache();
        let other = cache.clone();
        cache.insert("k".to_string(), 1).await;
        assert_eq!(other.get(&"k".to_string()).await, Some(1));
        other.invalidate(&"k".to_string()).await;
        assert_eq!(cache.get(&"k".to_string()).await, None);
    }
}
