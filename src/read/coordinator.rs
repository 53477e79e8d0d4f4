//! Read coordinator
//!
//! Cache-aside list reads. A hit returns the cached bytes untouched. A miss
//! joins or starts the single coalesced fetch for that query shape; the
//! leader's fetch serializes the rows once and hands them to the cache
//! writer before broadcasting.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::coalesce::{Role, SingleFlight};
use crate::cache::{CacheWriter, ListCache, QueryShape};
use crate::db::ItemStore;
use crate::types::{GateError, Result};

/// Where a list response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from the list cache
    Cache,
    /// This caller led the backing fetch
    Store,
    /// Joined a fetch another caller started
    Coalesced,
}

impl ReadSource {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Cache)
    }
}

/// Serialized list plus its provenance
#[derive(Debug, Clone)]
pub struct ListResponse {
    /// JSON array of items, newest first
    pub body: Bytes,
    pub source: ReadSource,
}

#[derive(Debug, Default)]
struct ReadMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    cache_errors: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Snapshot of read-path counters
#[derive(Debug, Clone, Serialize)]
pub struct ReadStats {
    pub hits: u64,
    pub misses: u64,
    pub cache_errors: u64,
    pub coalesced_waiters: u64,
    pub backing_fetches: u64,
    pub fetch_failures: u64,
    pub timeouts: u64,
}

/// Serves list queries through the cache and the coalescer
pub struct ReadCoordinator {
    store: Arc<dyn ItemStore>,
    cache: Arc<dyn ListCache>,
    writer: Arc<CacheWriter>,
    flights: SingleFlight,
    ttl: Duration,
    request_timeout: Duration,
    metrics: Arc<ReadMetrics>,
}

impl ReadCoordinator {
    pub fn new(
        store: Arc<dyn ItemStore>,
        cache: Arc<dyn ListCache>,
        writer: Arc<CacheWriter>,
        ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            writer,
            flights: SingleFlight::new(),
            ttl,
            request_timeout,
            metrics: Arc::new(ReadMetrics::default()),
        }
    }

    /// List items, newest first. `None` or `Some(0)` means the whole list.
    pub async fn list(&self, limit: Option<u32>) -> Result<ListResponse> {
        let shape = QueryShape::from_limit(limit);
        let key = shape.storage_key();

        match self.cache.get(&key).await {
            Ok(Some(body)) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(shape = %shape, "List cache hit");
                return Ok(ListResponse {
                    body,
                    source: ReadSource::Cache,
                });
            }
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                debug!(shape = %shape, "List cache miss");
            }
            Err(e) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                warn!(shape = %shape, "Cache read failed, reading from store: {}", e);
            }
        }

        let fetch = self.backing_fetch(shape, key.clone());

        let flight = match tokio::time::timeout(self.request_timeout, self.flights.run(&key, fetch)).await {
            Ok(flight) => flight,
            Err(_) => {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(GateError::Timeout(format!(
                    "List {} exceeded {}ms",
                    shape,
                    self.request_timeout.as_millis()
                )));
            }
        };

        let source = match flight.role {
            Role::Leader => ReadSource::Store,
            Role::Follower => {
                self.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                ReadSource::Coalesced
            }
        };

        flight.result.map(|body| ListResponse { body, source })
    }

    /// Query the store, serialize once, queue the cache write
    fn backing_fetch(
        &self,
        shape: QueryShape,
        key: String,
    ) -> impl std::future::Future<Output = Result<Bytes>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let writer = Arc::clone(&self.writer);
        let metrics = Arc::clone(&self.metrics);
        let ttl = self.ttl;

        async move {
            metrics.fetches.fetch_add(1, Ordering::Relaxed);

            // Read before the query; an invalidation after this point voids the fill
            let generation = match cache.generation().await {
                Ok(generation) => Some(generation),
                Err(e) => {
                    metrics.cache_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(shape = %shape, "Cache generation unavailable, not caching: {}", e);
                    None
                }
            };

            let items = match store.list(shape.limit()).await {
                Ok(items) => items,
                Err(e) => {
                    metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(shape = %shape, "Backing fetch failed: {}", e);
                    return Err(e);
                }
            };

            let body = Bytes::from(serde_json::to_vec(&items).map_err(|e| {
                metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                GateError::Internal(format!("Failed to encode list: {}", e))
            })?);

            if let Some(generation) = generation {
                writer.enqueue(key, body.clone(), ttl, generation);
            }
            Ok(body)
        }
    }

    pub fn stats(&self) -> ReadStats {
        ReadStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            cache_errors: self.metrics.cache_errors.load(Ordering::Relaxed),
            coalesced_waiters: self.metrics.coalesced.load(Ordering::Relaxed),
            backing_fetches: self.metrics.fetches.load(Ordering::Relaxed),
            fetch_failures: self.metrics.fetch_failures.load(Ordering::Relaxed),
            timeouts: self.metrics.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Keys with a backing fetch running right now
    pub async fn in_flight(&self) -> usize {
        self.flights.in_flight_count().await
    }
}
