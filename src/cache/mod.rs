//! Byte-bounded, thread-safe LRU cache for decoded images.
//!
//! One [`MemoryCache`] is typically shared (behind an [`Arc`]) by every
//! controller in a process. Entries are charged by their [`ByteSize`], not
//! by count, and evicted least-recently-used first.
//!
//! ## Insertion policy
//!
//! The first value cached for a key wins: [`MemoryCache::put`] on a key that
//! is already present does nothing. An entry only leaves the cache through
//! eviction.
//!
//! ## Locking
//!
//! A single mutex guards both the recency list and the running byte total,
//! so size accounting and eviction are atomic with respect to each other.

use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::trace;

use crate::decode::DecodedImage;

/// Fallback memory budget when the platform does not report one (256 MiB).
const FALLBACK_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Share of the memory budget given to the default cache.
const BUDGET_DIVISOR: usize = 8;

/// The cache type shared between controllers.
pub type ImageCache = MemoryCache<String, Arc<DecodedImage>>;

/// Values that know their own memory footprint.
pub trait ByteSize {
    /// Bytes this value is charged against a cache's capacity.
    fn byte_size(&self) -> usize;
}

impl<T: ByteSize + ?Sized> ByteSize for Arc<T> {
    fn byte_size(&self) -> usize {
        (**self).byte_size()
    }
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for bytes::Bytes {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Returns 1/8 of the memory currently available to the process.
///
/// Reads `MemAvailable` from `/proc/meminfo`; on platforms without it the
/// budget falls back to 256 MiB, giving a 32 MiB cache.
pub fn default_capacity() -> usize {
    available_memory().unwrap_or(FALLBACK_MEMORY_BUDGET) / BUDGET_DIVISOR
}

fn available_memory() -> Option<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<usize>().ok())
        .map(|kb| kb.saturating_mul(1024))
}

/// Counters describing how a cache has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    /// `put` calls ignored because the key was already cached.
    pub rejected: u64,
    pub evictions: u64,
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, V>,
    total_bytes: usize,
    stats: CacheStats,
}

/// A byte-bounded LRU map with first-writer-wins insertion.
///
/// # Examples
///
/// ```
/// use urlimage::cache::MemoryCache;
///
/// let cache: MemoryCache<String, Vec<u8>> = MemoryCache::new(100);
/// cache.put("a".to_owned(), vec![1; 40]);
/// cache.put("a".to_owned(), vec![2; 40]); // ignored, "a" is already cached
/// assert_eq!(cache.get("a"), Some(vec![1; 40]));
/// assert_eq!(cache.total_bytes(), 40);
/// ```
pub struct MemoryCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq, V: ByteSize + Clone> MemoryCache<K, V> {
    /// Creates a cache holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
            capacity,
        }
    }

    /// Creates a cache sized by [`default_capacity`].
    pub fn with_default_capacity() -> Self {
        Self::new(default_capacity())
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key`, promoting it to most-recently-used on a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.lock();
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Inserts `value` under `key` unless `key` is already cached.
    ///
    /// After inserting, least-recently-used entries are evicted until the
    /// total size fits the capacity. A value larger than the whole capacity
    /// is therefore evicted immediately.
    ///
    /// Returns `true` if the value was inserted.
    pub fn put(&self, key: K, value: V) -> bool {
        let size = value.byte_size();
        let mut inner = self.lock();

        if inner.entries.contains(&key) {
            inner.stats.rejected += 1;
            return false;
        }

        inner.entries.put(key, value);
        inner.total_bytes += size;
        inner.stats.insertions += 1;

        while inner.total_bytes > self.capacity {
            let Some((_, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            let evicted_size = evicted.byte_size();
            inner.total_bytes -= evicted_size;
            inner.stats.evictions += 1;
            trace!(
                bytes = evicted_size,
                total = inner.total_bytes,
                "evicted cache entry"
            );
        }
        true
    }

    /// Returns `true` if `key` is cached, without touching its recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().entries.contains(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the byte sizes of all cached entries.
    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the usage counters.
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl<K: Hash + Eq, V: ByteSize + Clone> Default for MemoryCache<K, V> {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for MemoryCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("entries", &inner.entries.len())
            .field("total_bytes", &inner.total_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(capacity: usize) -> MemoryCache<String, Vec<u8>> {
        MemoryCache::new(capacity)
    }

    #[test]
    fn evicts_oldest_by_bytes() {
        let c = cache(100);
        c.put("A".into(), vec![0; 40]);
        c.put("B".into(), vec![0; 40]);
        c.put("C".into(), vec![0; 40]);

        assert!(!c.contains("A"));
        assert!(c.contains("B"));
        assert!(c.contains("C"));
        assert_eq!(c.total_bytes(), 80);
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_recency() {
        let c = cache(100);
        c.put("A".into(), vec![0; 40]);
        c.put("B".into(), vec![0; 40]);
        assert!(c.get("A").is_some());
        c.put("C".into(), vec![0; 40]);

        assert!(c.contains("A"));
        assert!(!c.contains("B"));
    }

    #[test]
    fn first_writer_wins() {
        let c = cache(100);
        assert!(c.put("u".into(), vec![1; 10]));
        assert!(!c.put("u".into(), vec![2; 30]));

        assert_eq!(c.get("u"), Some(vec![1; 10]));
        assert_eq!(c.total_bytes(), 10);
        assert_eq!(c.stats().rejected, 1);
    }

    #[test]
    fn rejected_put_does_not_promote() {
        let c = cache(100);
        c.put("A".into(), vec![0; 40]);
        c.put("B".into(), vec![0; 40]);
        c.put("A".into(), vec![9; 40]);
        c.put("C".into(), vec![0; 40]);

        assert!(!c.contains("A"));
        assert!(c.contains("B"));
    }

    #[test]
    fn oversized_value_is_evicted_immediately() {
        let c = cache(10);
        c.put("small".into(), vec![0; 5]);
        assert!(c.put("huge".into(), vec![0; 11]));

        assert!(!c.contains("huge"));
        assert!(!c.contains("small"));
        assert_eq!(c.total_bytes(), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn hit_and_miss_counters() {
        let c = cache(100);
        c.put("a".into(), vec![0; 1]);
        c.get("a");
        c.get("b");
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.insertions), (1, 1, 1));
    }

    #[test]
    fn concurrent_puts_never_exceed_capacity() {
        let c = Arc::new(cache(1_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..200 {
                        c.put(format!("{t}-{i}"), vec![0; 37 + (i % 50)]);
                        assert!(c.total_bytes() <= 1_000);
                        c.get(&format!("{t}-{}", i / 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(c.total_bytes() <= 1_000);
        let stats = c.stats();
        assert_eq!(stats.insertions, 8 * 200);
        assert_eq!(stats.insertions - stats.evictions, c.len() as u64);
    }

    #[test]
    fn concurrent_first_writer_wins() {
        let c = Arc::new(cache(10_000));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || c.put("shared".into(), vec![t; 16]))
            })
            .collect();
        let inserted: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(inserted, 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.total_bytes(), 16);
    }

    #[test]
    fn default_capacity_is_positive() {
        assert!(default_capacity() > 0);
    }
}
