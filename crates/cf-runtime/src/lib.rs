#![forbid(unsafe_code)]

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod config;
pub mod oracle;

pub use config::EngineConfig;
pub use oracle::{NoOracle, NumericOracle, OracleError, OracleParams};

/// Cache categories used across the workspace.
pub mod categories {
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const KS_DISTANCES: &str = "ks_distances";
    pub const MUTUAL_INFORMATION_TABLES: &str = "mutual_information_tables";
    pub const RANDOM_SAMPLES: &str = "not_so_random_samples";
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("invalid engine configuration: {field} must be {requirement}")]
    InvalidSetting {
        field: &'static str,
        requirement: &'static str,
    },
}

/// Hex SHA-256 digest of a table's content. Stable across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental content hasher. Strings are length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` digest differently.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_values(&mut self, values: &[f64]) {
        for value in values {
            self.inner.update(value.to_le_bytes());
        }
    }

    pub fn update_str(&mut self, value: &str) {
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value.as_bytes());
    }

    pub fn update_u64(&mut self, value: u64) {
        self.inner.update(value.to_le_bytes());
    }

    #[must_use]
    pub fn finish(self) -> ContentHash {
        ContentHash(format!("{:x}", self.inner.finalize()))
    }
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub category: String,
    pub digest: String,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.digest)
    }
}

/// Derives a [`CacheKey`] from the semantically relevant inputs of a call.
/// Each input is prefixed by a type marker so different argument shapes never
/// produce the same byte stream.
#[derive(Clone)]
pub struct KeyBuilder {
    category: String,
    hasher: ContentHasher,
}

impl KeyBuilder {
    #[must_use]
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            hasher: ContentHasher::new(),
        }
    }

    #[must_use]
    pub fn hash(mut self, hash: &ContentHash) -> Self {
        self.hasher.update_str("h");
        self.hasher.update_str(hash.as_str());
        self
    }

    #[must_use]
    pub fn text(mut self, value: &str) -> Self {
        self.hasher.update_str("s");
        self.hasher.update_str(value);
        self
    }

    #[must_use]
    pub fn number(mut self, value: f64) -> Self {
        self.hasher.update_str("f");
        self.hasher.update_u64(value.to_bits());
        self
    }

    #[must_use]
    pub fn optional_number(self, value: Option<f64>) -> Self {
        match value {
            Some(value) => self.flag(true).number(value),
            None => self.flag(false),
        }
    }

    #[must_use]
    pub fn count(mut self, value: usize) -> Self {
        self.hasher.update_str("u");
        self.hasher.update_u64(value as u64);
        self
    }

    #[must_use]
    pub fn unsigned(mut self, value: u64) -> Self {
        self.hasher.update_str("q");
        self.hasher.update_u64(value);
        self
    }

    #[must_use]
    pub fn flag(mut self, value: bool) -> Self {
        self.hasher.update_str("b");
        self.hasher.update_u64(u64::from(value));
        self
    }

    #[must_use]
    pub fn finish(self) -> CacheKey {
        CacheKey {
            category: self.category,
            digest: self.hasher.finish().0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Content-addressed memoization service.
///
/// Values are stored as `Arc<T>` under a [`CacheKey`]. Computation runs
/// outside any shard lock, so concurrent callers may compute the same key more
/// than once; the last insert wins. Nothing is evicted unless a caller clears
/// a category.
#[derive(Default)]
pub struct MemoCache {
    entries: DashMap<CacheKey, Arc<dyn Any + Send + Sync>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance for hosts that do not thread their own cache
    /// through.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<MemoCache> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    pub fn memoize<T, E, F>(&self, key: CacheKey, compute: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.lookup::<T>(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "tracing")]
        tracing::trace!(key = %key, "memo miss");

        let value = Arc::new(compute()?);
        let stored: Arc<dyn Any + Send + Sync> = value.clone();
        self.entries.insert(key, stored);
        Ok(value)
    }

    /// A stored value of a different type than `T` reads as a miss.
    #[must_use]
    pub fn lookup<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let stored = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        stored.downcast::<T>().ok()
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drops every entry of `category`, returning how many were removed.
    pub fn clear_category(&self, category: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.category != category);
        let removed = before.saturating_sub(self.entries.len());
        #[cfg(feature = "tracing")]
        tracing::debug!(category, removed, "memo category cleared");
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

impl fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;

    use super::{ContentHasher, KeyBuilder, MemoCache, categories};

    #[test]
    fn hasher_is_deterministic_and_length_prefixed() {
        let digest = |parts: &[&str]| {
            let mut hasher = ContentHasher::new();
            for part in parts {
                hasher.update_str(part);
            }
            hasher.finish()
        };
        assert_eq!(digest(&["ab", "c"]), digest(&["ab", "c"]));
        assert_ne!(digest(&["ab", "c"]), digest(&["a", "bc"]));
        assert_eq!(digest(&[]).as_str().len(), 64);
    }

    #[test]
    fn key_builder_separates_categories_and_arguments() {
        let a = KeyBuilder::new(categories::MIN).text("CD3").finish();
        let b = KeyBuilder::new(categories::MAX).text("CD3").finish();
        let c = KeyBuilder::new(categories::MIN).text("CD4").finish();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            KeyBuilder::new("x").optional_number(None).finish(),
            KeyBuilder::new("x").optional_number(Some(0.0)).finish()
        );
        assert_ne!(
            KeyBuilder::new("x").unsigned(1 << 32).finish(),
            KeyBuilder::new("x").unsigned(1 << 33).finish()
        );
        assert_ne!(
            KeyBuilder::new("x").unsigned(7).finish(),
            KeyBuilder::new("x").count(7).finish()
        );
    }

    #[test]
    fn memoize_computes_once_per_key() {
        let cache = MemoCache::new();
        let calls = Cell::new(0);
        let key = KeyBuilder::new("stat").count(3).finish();

        for _ in 0..3 {
            let value = cache
                .memoize(key.clone(), || {
                    calls.set(calls.get() + 1);
                    Ok::<_, Infallible>(42.0_f64)
                })
                .expect("memoize");
            assert_eq!(*value, 42.0);
        }

        assert_eq!(calls.get(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (2, 1, 1));
    }

    #[test]
    fn failed_computation_is_not_cached() {
        let cache = MemoCache::new();
        let key = KeyBuilder::new("stat").finish();
        let err = cache
            .memoize::<f64, _, _>(key.clone(), || Err("boom"))
            .expect_err("must fail");
        assert_eq!(err, "boom");
        assert!(!cache.contains(&key));
    }

    #[test]
    fn clear_category_leaves_other_categories() {
        let cache = MemoCache::new();
        for category in [categories::MIN, categories::MIN, categories::MAX] {
            let key = KeyBuilder::new(category).count(cache.len()).finish();
            cache
                .memoize(key, || Ok::<_, Infallible>(1_u8))
                .expect("memoize");
        }
        assert_eq!(cache.clear_category(categories::MIN), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn type_mismatch_reads_as_miss() {
        let cache = MemoCache::new();
        let key = KeyBuilder::new("stat").finish();
        cache
            .memoize(key.clone(), || Ok::<_, Infallible>(1_u32))
            .expect("memoize");
        assert!(cache.lookup::<String>(&key).is_none());
        assert_eq!(cache.lookup::<u32>(&key).as_deref(), Some(&1));
    }
}
