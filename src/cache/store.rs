//! In-process list cache
//!
//! DashMap-backed store with TTL, prefix invalidation and oldest-first
//! eviction when over capacity.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::keys::LIST_KEY_PREFIX;
use super::{CacheConfig, ListCache};
use crate::types::Result;

/// A cached entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized list view, returned verbatim on hit
    pub data: Bytes,
    /// When this entry was created
    pub created_at: Instant,
    /// When this entry expires
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(data: Bytes, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            data,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory list cache
pub struct MemoryListCache {
    /// storage_key -> entry
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    /// Bumped by every list invalidation
    generation: AtomicU64,
}

impl MemoryListCache {
    /// Create a new cache with configuration
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Get an entry by storage key
    pub fn get_entry(&self, storage_key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(storage_key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = storage_key, "Cache hit");
                return Some(entry.clone());
            }
            drop(entry); // Release the shard guard before removing
            self.entries.remove(storage_key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = storage_key, "Cache miss");
        None
    }

    /// Store an entry with explicit TTL
    pub fn insert(&self, storage_key: &str, data: Bytes, ttl: Duration) {
        debug!(key = storage_key, ttl_secs = ttl.as_secs(), "Cache set");
        self.entries
            .insert(storage_key.to_string(), CacheEntry::new(data, ttl));
        self.maybe_evict();
    }

    /// Invalidate entries matching a prefix
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(pattern));
        let count = before.saturating_sub(self.entries.len());

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if count > 0 {
            debug!(pattern = pattern, count = count, "Invalidated cache entries");
        }
        count
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            debug!(count = count, "Cleaned up expired cache entries");
        }
        count
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Evict entries if over capacity (oldest first)
    fn maybe_evict(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        let to_evict = self.entries.len() - self.config.max_entries;

        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();

        entries.sort_by_key(|(_, created)| *created);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(evicted = to_evict, "Evicted cache entries");
    }
}

impl Default for MemoryListCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl ListCache for MemoryListCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.get_entry(key).map(|entry| entry.data))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn invalidate_lists(&self) -> Result<usize> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(self.invalidate_pattern(LIST_KEY_PREFIX))
    }

    async fn generation(&self) -> Result<u64> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn ping(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Spawn a background task to periodically cleanup expired entries
pub fn spawn_cleanup_task(cache: Arc<MemoryListCache>) {
    let interval = cache.config.cleanup_interval;

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed = removed,
                entries = stats.entries,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Cache cleanup completed"
            );
        }
    });

    info!("Cache cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryShape;

    fn ttl() -> Duration {
        Duration::from_secs(300)
    }

    #[tokio::test]
    async fn test_get_set_returns_same_bytes() {
        let cache = MemoryListCache::with_defaults();
        let key = QueryShape::All.storage_key();
        let body = Bytes::from_static(br#"[{"id":"t1"}]"#);

        assert!(cache.get(&key).await.unwrap().is_none());

        cache.set(&key, body.clone(), ttl()).await.unwrap();
        let hit = cache.get(&key).await.unwrap().expect("entry");
        assert_eq!(hit, body);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = MemoryListCache::with_defaults();
        let key = QueryShape::First(3).storage_key();

        cache.insert(&key, Bytes::from_static(b"[]"), Duration::from_millis(10));
        assert!(cache.get_entry(&key).is_some());

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get_entry(&key).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_lists_drops_every_shape() {
        let cache = MemoryListCache::with_defaults();
        cache.insert(&QueryShape::All.storage_key(), Bytes::from_static(b"[1]"), ttl());
        cache.insert(&QueryShape::First(3).storage_key(), Bytes::from_static(b"[2]"), ttl());
        cache.insert(&QueryShape::First(10).storage_key(), Bytes::from_static(b"[3]"), ttl());
        cache.insert("unrelated.key", Bytes::from_static(b"x"), ttl());

        let removed = cache.invalidate_lists().await.unwrap();

        assert_eq!(removed, 3);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get(&QueryShape::First(3).storage_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_if_current_discards_view_from_before_invalidation() {
        let cache = MemoryListCache::with_defaults();
        let key = QueryShape::All.storage_key();

        let before = cache.generation().await.unwrap();
        cache.invalidate_lists().await.unwrap();

        let stored = cache
            .set_if_current(&key, Bytes::from_static(b"[\"stale\"]"), ttl(), before)
            .await
            .unwrap();
        assert!(!stored);
        assert!(cache.get_entry(&key).is_none());

        let now = cache.generation().await.unwrap();
        assert_ne!(now, before);
        assert!(cache
            .set_if_current(&key, Bytes::from_static(b"[]"), ttl(), now)
            .await
            .unwrap());
        assert!(cache.get_entry(&key).is_some());
    }

    /// An invalidation lands between the generation check and the write
    struct RacingCache {
        inner: MemoryListCache,
    }

    #[async_trait]
    impl ListCache for RacingCache {
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
            self.inner.invalidate_lists().await?;
            self.inner.set(key, value, ttl).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn invalidate_lists(&self) -> Result<usize> {
            self.inner.invalidate_lists().await
        }

        async fn generation(&self) -> Result<u64> {
            self.inner.generation().await
        }

        async fn ping(&self) -> bool {
            true
        }

        fn backend_name(&self) -> &'static str {
            "racing"
        }
    }

    #[tokio::test]
    async fn test_set_if_current_undoes_write_raced_by_invalidation() {
        let cache = RacingCache {
            inner: MemoryListCache::with_defaults(),
        };
        let key = QueryShape::First(3).storage_key();
        let generation = cache.generation().await.unwrap();

        let stored = cache
            .set_if_current(&key, Bytes::from_static(b"[]"), ttl(), generation)
            .await
            .unwrap();

        assert!(!stored);
        assert!(cache.inner.get_entry(&key).is_none());
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let cache = MemoryListCache::new(config);

        cache.insert("items.list.first.1", Bytes::from_static(b"1"), ttl());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("items.list.first.2", Bytes::from_static(b"2"), ttl());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("items.list.first.3", Bytes::from_static(b"3"), ttl());

        assert_eq!(cache.stats().entries, 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get_entry("items.list.first.1").is_none());
        assert!(cache.get_entry("items.list.first.3").is_some());
    }

    #[test]
    fn test_cleanup_removes_expired() {
        let cache = MemoryListCache::with_defaults();
        cache.insert("items.list.all", Bytes::from_static(b"[]"), Duration::from_millis(5));
        cache.insert("items.list.first.2", Bytes::from_static(b"[]"), ttl());

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.stats().entries, 1);
    }
}
