//! Content-addressed block cache
//!
//! This module provides the bounded, thread-safe LRU store mapping a block's
//! content hash to its previously rendered HTML fragment. The cache is the
//! only render state shared between the control thread (reads during merge)
//! and the worker pool (writes on render completion); all synchronization is
//! internal, callers never lock.
//!
//! Failed renders are never stored, so a transient backend failure retries
//! naturally on the next generation without manual invalidation.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of rendered fragments kept in the cache
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// 128-bit content hash of a block's raw text; the cache key
///
/// Truncated blake3. Two blocks with equal hashes are treated as producing
/// identical rendered HTML (the render backend is pure and deterministic).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hash the raw text of a block
    pub fn of(text: &str) -> Self {
        let digest = blake3::hash(text.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        ContentHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Get the hash as a hex string
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Get cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Block Cache:")?;
        writeln!(
            f,
            "  Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )?;
        writeln!(f, "  Entries: {} / {}", self.entries, self.capacity)?;
        Ok(())
    }
}

/// Bounded, thread-safe LRU store of rendered fragments
///
/// Exact LRU: eviction always removes the least-recently-used entry, ties
/// broken by insertion order. A hit touches the entry; a miss has no side
/// effect.
pub struct BlockCache {
    entries: Mutex<LruCache<ContentHash, String>>,
    capacity: usize,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` rendered fragments
    pub fn new(capacity: usize) -> Self {
        let bounded = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        BlockCache {
            entries: Mutex::new(LruCache::new(bounded)),
            capacity: bounded.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a rendered fragment, touching the entry on hit
    pub fn get(&self, hash: &ContentHash) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(hash) {
            Some(html) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(html.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successfully rendered fragment, evicting the LRU entry if
    /// the cache is at capacity
    pub fn put(&self, hash: ContentHash, html: String) {
        self.entries.lock().put(hash, html);
    }

    /// Membership check without touching LRU order or hit/miss counters
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.lock().peek(hash).is_some()
    }

    /// Number of cached fragments
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries and reset counters
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCache")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
