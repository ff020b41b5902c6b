//! Content-addressed cache for optimization results.
//!
//! A cache key is the SHA-256 fingerprint of the template content plus
//! the serialized optimization config: any byte change in either
//! produces a different key. Entries expire after a TTL; an expired
//! entry behaves as a miss and is lazily evicted. A per-template index
//! supports invalidating every entry for a template regardless of
//! config, and looking up the most recent result for feedback handling.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::CacheError;
use crate::types::{OptimizationConfig, OptimizationResult};

/// Deterministic fingerprint of (template content, optimization config).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compute the fingerprint for a template's content and a config.
    ///
    /// Pure and content-based: equal inputs always yield the same key.
    /// The content and the serialized config are separated by a NUL
    /// byte so boundary-shifting collisions cannot occur.
    pub fn compute(
        template_content: &str,
        config: &OptimizationConfig,
    ) -> Result<Self, CacheError> {
        let config_json = serde_json::to_vec(config)?;
        let mut hasher = Sha256::new();
        hasher.update(template_content.as_bytes());
        hasher.update([0u8]);
        hasher.update(&config_json);
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Hex string form of the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cached result with its expiry metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    result: OptimizationResult,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }
}

/// Cache counters for monitoring.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Current number of stored entries (fresh or not yet evicted).
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in [0, 1]; 0.0 when there have been no accesses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Inner state behind a single lock: the entry map plus a
/// template-id index used for invalidation and latest-result lookup.
#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// template_id -> keys stored for it, most recent last.
    by_template: HashMap<String, Vec<CacheKey>>,
}

/// Thread-safe result cache with TTL expiry and per-template
/// invalidation.
///
/// Writes occur only on pipeline success; reads are lock-held only for
/// the map lookup so concurrent callers do not serialize on the
/// network.
pub struct ResultCache {
    inner: RwLock<CacheInner>,
    stats: RwLock<CacheStats>,
    max_entries: usize,
    default_ttl: Duration,
}

impl ResultCache {
    /// Create a cache with the given capacity and default TTL.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            stats: RwLock::new(CacheStats::default()),
            max_entries,
            default_ttl,
        }
    }

    /// Default TTL applied when `set` is called without an explicit TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a fresh result by key.
    ///
    /// An expired entry counts as a miss and is lazily evicted. A miss
    /// has no side effect beyond the miss counter.
    pub fn get(&self, key: &CacheKey) -> Option<OptimizationResult> {
        let hit = {
            let inner = self.inner.read().expect("cache read lock poisoned");
            inner
                .entries
                .get(key)
                .filter(|entry| entry.is_fresh())
                .map(|entry| entry.result.clone())
        };

        match hit {
            Some(result) => {
                self.stats.write().expect("stats write lock poisoned").hits += 1;
                Some(result)
            }
            None => {
                self.evict_if_expired(key);
                // Read the length before locking stats: `set` takes the
                // locks in the opposite order.
                let entries = self.len();
                let mut stats = self.stats.write().expect("stats write lock poisoned");
                stats.misses += 1;
                stats.entries = entries;
                None
            }
        }
    }

    /// Store a result under a key with an explicit TTL.
    ///
    /// The key is also indexed under the result's template id so the
    /// whole template can be invalidated later.
    pub fn set(&self, key: CacheKey, result: OptimizationResult, ttl: Duration) {
        let template_id = result.template_id.clone();
        let mut inner = self.inner.write().expect("cache write lock poisoned");

        if inner.entries.len() >= self.max_entries && !inner.entries.contains_key(&key) {
            Self::evict_oldest(&mut inner, &self.stats);
        }

        inner.entries.insert(
            key.clone(),
            CacheEntry {
                result,
                created_at: Instant::now(),
                ttl,
            },
        );

        let keys = inner.by_template.entry(template_id).or_default();
        keys.retain(|k| k != &key);
        keys.push(key);

        let mut stats = self.stats.write().expect("stats write lock poisoned");
        stats.insertions += 1;
        stats.entries = inner.entries.len();
    }

    /// Store a result using the cache's default TTL.
    pub fn set_default(&self, key: CacheKey, result: OptimizationResult) {
        self.set(key, result, self.default_ttl);
    }

    /// Most recently stored fresh result for a template, across all
    /// configs. Used by feedback-driven re-optimization.
    pub fn latest_for_template(&self, template_id: &str) -> Option<OptimizationResult> {
        let inner = self.inner.read().expect("cache read lock poisoned");
        let keys = inner.by_template.get(template_id)?;
        keys.iter().rev().find_map(|key| {
            inner
                .entries
                .get(key)
                .filter(|entry| entry.is_fresh())
                .map(|entry| entry.result.clone())
        })
    }

    /// Remove every entry for a template regardless of config.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_template(&self, template_id: &str) -> usize {
        let mut inner = self.inner.write().expect("cache write lock poisoned");
        let Some(keys) = inner.by_template.remove(template_id) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if inner.entries.remove(&key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            let mut stats = self.stats.write().expect("stats write lock poisoned");
            stats.evictions += removed as u64;
            stats.entries = inner.entries.len();
        }
        removed
    }

    /// Remove all entries. Counters are preserved.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("cache write lock poisoned");
        inner.entries.clear();
        inner.by_template.clear();
        self.stats.write().expect("stats write lock poisoned").entries = 0;
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        let mut stats = self.stats.read().expect("stats read lock poisoned").clone();
        stats.entries = entries;
        stats
    }

    /// Number of stored entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("cache read lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily evict the entry under `key` if it has expired.
    fn evict_if_expired(&self, key: &CacheKey) {
        let mut inner = self.inner.write().expect("cache write lock poisoned");
        let expired = inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_fresh());
        if expired {
            if let Some(entry) = inner.entries.remove(key) {
                if let Some(keys) = inner.by_template.get_mut(&entry.result.template_id) {
                    keys.retain(|k| k != key);
                    if keys.is_empty() {
                        inner.by_template.remove(&entry.result.template_id);
                    }
                }
            }
            self.stats
                .write()
                .expect("stats write lock poisoned")
                .evictions += 1;
        }
    }

    /// Evict the entry closest to expiry to make room for an insert.
    fn evict_oldest(inner: &mut CacheInner, stats: &RwLock<CacheStats>) {
        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, entry)| (key.clone(), entry.result.template_id.clone()));

        if let Some((key, template_id)) = oldest {
            inner.entries.remove(&key);
            if let Some(keys) = inner.by_template.get_mut(&template_id) {
                keys.retain(|k| k != &key);
                if keys.is_empty() {
                    inner.by_template.remove(&template_id);
                }
            }
            stats.write().expect("stats write lock poisoned").evictions += 1;
        }
    }
}
