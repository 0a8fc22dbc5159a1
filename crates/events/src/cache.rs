//! Keyed query cache with per-entry TTL.
//!
//! Read-side queries are cached here and the whole cache is dropped whenever
//! an issue is mutated, via [`CacheInvalidator`].
//!
//! A reader that loads from the store takes a [`generation`](QueryCache::generation)
//! first and stores with [`insert_if_generation`](QueryCache::insert_if_generation).
//! If an invalidation ran in between, the stale result is not cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Entries beyond this count trigger an eviction sweep of expired entries.
const MAX_CACHE_ENTRIES: usize = 2048;

pub const STATUS_TTL: Duration = Duration::from_secs(300);
pub const PRIORITY_TTL: Duration = Duration::from_secs(180);
pub const SUMMARY_TTL: Duration = Duration::from_secs(600);
pub const NEARBY_TTL: Duration = Duration::from_secs(900);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Something that must be told when persisted issues change.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_all(&self);
}

pub struct QueryCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    /// Bumped on every invalidation, always under the `entries` write lock.
    generation: AtomicU64,
}

impl<V: Clone + Send + Sync> QueryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current invalidation generation. Take it before reading the source.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Fresh value for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        Self::store(&mut entries, key.into(), value, ttl);
    }

    /// Insert only if no invalidation happened since `generation` was taken.
    /// Returns whether the value was cached.
    pub async fn insert_if_generation(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::trace!("Skipping cache insert after invalidation");
            return false;
        }
        Self::store(&mut entries, key.into(), value, ttl);
        true
    }

    fn store(entries: &mut HashMap<String, CacheEntry<V>>, key: String, value: V, ttl: Duration) {
        let now = Instant::now();
        if entries.len() >= MAX_CACHE_ENTRIES {
            entries.retain(|_, e| now < e.expires_at);
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<V: Clone + Send + Sync> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> CacheInvalidator for QueryCache<V> {
    async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        if !entries.is_empty() {
            tracing::debug!(entries = entries.len(), "Invalidating query cache");
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_before_expiry() {
        let cache = QueryCache::new();
        cache.insert("status:resolved", vec![1, 2], STATUS_TTL).await;
        assert_eq!(cache.get("status:resolved").await, Some(vec![1, 2]));
        assert_eq!(cache.get("status:other").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_after_expiry() {
        let cache = QueryCache::new();
        cache.insert("priority:4", 7u32, PRIORITY_TTL).await;

        tokio::time::advance(PRIORITY_TTL - Duration::from_secs(1)).await;
        assert_eq!(cache.get("priority:4").await, Some(7));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("priority:4").await, None);
    }

    #[tokio::test]
    async fn invalidate_prefix_only_drops_matching_keys() {
        let cache = QueryCache::new();
        cache.insert("nearby:a", 1, NEARBY_TTL).await;
        cache.insert("nearby:b", 2, NEARBY_TTL).await;
        cache.insert("summary", 3, SUMMARY_TTL).await;

        cache.invalidate_prefix("nearby:").await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("summary").await, Some(3));
    }

    #[tokio::test]
    async fn invalidator_clears_everything() {
        let cache = QueryCache::new();
        cache.insert("a", 1, STATUS_TTL).await;
        cache.insert("b", 2, STATUS_TTL).await;

        let invalidator: &dyn CacheInvalidator = &cache;
        invalidator.invalidate_all().await;
        assert!(cache.is_empty().await);
    }

    // -- generation --

    #[tokio::test]
    async fn insert_after_invalidation_is_dropped() {
        let cache = QueryCache::new();
        let generation = cache.generation();

        // A mutation lands while the reader is still loading.
        cache.invalidate_all().await;

        assert!(!cache.insert_if_generation("status:1", 0, STATUS_TTL, generation).await);
        assert_eq!(cache.get("status:1").await, None);

        let fresh = cache.generation();
        assert!(cache.insert_if_generation("status:1", 1, STATUS_TTL, fresh).await);
        assert_eq!(cache.get("status:1").await, Some(1));
    }

    #[tokio::test]
    async fn clear_bumps_generation() {
        let cache: QueryCache<u8> = QueryCache::new();
        let before = cache.generation();
        cache.clear().await;
        assert_ne!(cache.generation(), before);
    }
}
