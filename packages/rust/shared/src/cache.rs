//! In-process memoization of backend calls.
//!
//! Clients take an `Arc<dyn CallCache<V>>` so callers decide the scope:
//! one [`MemoryCache`] shared across concurrent triage runs, a pre-seeded one
//! in tests, or [`NoopCache`] to disable memoization entirely.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};
use tracing::debug;

/// Exact-argument cache key: a SHA-256 over a namespace and the call arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash `parts` under `namespace`. Each part is length-prefixed so
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn new(namespace: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A memoization store safe for concurrent population.
///
/// Racing `put`s for the same key carry identical values, so either writer may win.
pub trait CallCache<V>: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<V>;
    fn put(&self, key: CacheKey, value: V);
}

/// Hit/miss counters for a [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Process-lifetime cache backed by a `RwLock<HashMap>`.
pub struct MemoryCache<V> {
    entries: RwLock<HashMap<CacheKey, V>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<V: Clone + Send + Sync> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Build a cache that already holds `entries`.
    pub fn seeded(entries: impl IntoIterator<Item = (CacheKey, V)>) -> Self {
        let cache = Self::new();
        for (key, value) in entries {
            cache.put(key, value);
        }
        cache
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone + Send + Sync> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> CallCache<V> for MemoryCache<V> {
    fn get(&self, key: &CacheKey) -> Option<V> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned();

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache miss");
        }
        found
    }

    fn put(&self, key: CacheKey, value: V) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, value);
    }
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl<V> CallCache<V> for NoopCache {
    fn get(&self, _key: &CacheKey) -> Option<V> {
        None
    }

    fn put(&self, _key: CacheKey, _value: V) {}
}
