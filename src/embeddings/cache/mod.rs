
use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

/// Default time-to-live for cached embeddings (24 hours).
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default maximum number of cached entries.
const DEFAULT_MAX_SIZE: usize = 10_000;
/// Fraction of the cache evicted (oldest first) when the cache is full.
const EVICTION_FRACTION: usize = 10;

struct CacheEntry {
    embedding: Vec<f32>,
    created_at: Instant,
    /// Insertion order, used as an eviction tiebreaker when timestamps collide.
    seq: u64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Bounded, TTL-based in-memory cache for embedding vectors.
///
/// Keys are SHA-256 hashes of `model + ":" + text`, so lookups never retain
/// the original text. The cache holds no lock of its own: it is an owned
/// value injected into its caller, and multi-threaded hosts should scope one
/// cache per worker.
pub struct EmbeddingCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    next_seq: u64,
}

impl Default for EmbeddingCache {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

impl EmbeddingCache {
    #[inline]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            next_seq: 0,
        }
    }

    /// Cache key for a (model, text) pair.
    pub(crate) fn cache_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.created_at.elapsed() >= self.ttl
    }

    /// Look up a cached embedding. Entries past their TTL are treated as
    /// absent and purged on access.
    #[inline]
    pub fn get(&mut self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(text, model);

        let expired = self.entries.get(&key).is_some_and(|e| self.is_expired(e));
        if expired {
            self.entries.remove(&key);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }

        match self.entries.get(&key) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.embedding.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert an embedding, evicting the oldest tenth of the cache first when
    /// the cache is full.
    #[inline]
    pub fn set(&mut self, text: &str, model: &str, embedding: Vec<f32>) {
        let key = Self::cache_key(text, model);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            CacheEntry {
                embedding,
                created_at: Instant::now(),
                seq,
            },
        );
    }

    fn evict_oldest(&mut self) {
        let batch = (self.max_size / EVICTION_FRACTION).max(1);

        let mut by_age: Vec<(String, Instant, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.created_at, e.seq))
            .collect();
        by_age.sort_by_key(|(_, created, seq)| (*created, *seq));

        for (key, _, _) in by_age.into_iter().take(batch) {
            self.entries.remove(&key);
            self.evictions += 1;
        }

        debug!("Evicted {} oldest cache entries", batch);
    }

    /// Whether an unexpired entry exists for the pair.
    #[inline]
    pub fn has(&self, text: &str, model: &str) -> bool {
        let key = Self::cache_key(text, model);
        self.entries.get(&key).is_some_and(|e| !self.is_expired(e))
    }

    /// Remove one entry; returns whether it was present.
    #[inline]
    pub fn remove(&mut self, text: &str, model: &str) -> bool {
        let key = Self::cache_key(text, model);
        self.entries.remove(&key).is_some()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
        }
    }
}
