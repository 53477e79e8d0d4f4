//! List-view cache
//!
//! Cached views are keyed by query shape and hold the exact serialized body
//! a reader returns. The processor drops every list view after each applied
//! command; views also expire after the configured TTL.

pub mod keys;
pub mod nats_kv;
pub mod store;
pub mod writer;

pub use keys::{QueryShape, LIST_KEY_PREFIX};
pub use nats_kv::NatsKvListCache;
pub use store::{spawn_cleanup_task, CacheEntry, CacheStats, MemoryListCache};
pub use writer::{CacheWriter, WriterConfig, WriterStats};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::types::Result;

/// Configuration for the in-process cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Cleanup interval for expired entries
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Key-value store for serialized list views
#[async_trait]
pub trait ListCache: Send + Sync {
    /// Fetch a cached view; `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a view
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Remove one key
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop every list view, returning how many were removed.
    ///
    /// Advances the generation before removing anything.
    async fn invalidate_lists(&self) -> Result<usize>;

    /// Changes whenever list views are invalidated
    async fn generation(&self) -> Result<u64>;

    /// Store a view computed under `generation`, unless an invalidation has
    /// happened since. Returns false when the view was discarded.
    ///
    /// The generation is checked again after the write, so an invalidation
    /// racing the write removes the key instead of leaving a stale view.
    async fn set_if_current(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool> {
        if self.generation().await? != generation {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        if self.generation().await? != generation {
            self.remove(key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether the backend is reachable
    async fn ping(&self) -> bool;

    /// Short backend name for status output
    fn backend_name(&self) -> &'static str;
}
