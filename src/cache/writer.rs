//! Background cache population
//!
//! Readers hand freshly fetched list views to a bounded queue served by a
//! fixed set of worker tasks, so a slow cache never delays a response. When
//! the queue is full the write is dropped and counted; the next miss for that
//! shape will try again.
//!
//! Each write carries the cache generation read before its view was fetched.
//! A write whose generation has moved on is discarded as stale.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ListCache;

/// A pending cache write
struct CacheWrite {
    key: String,
    value: Bytes,
    ttl: Duration,
    generation: u64,
}

/// Configuration for the writer pool
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum queued writes
    pub max_queue_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1024,
        }
    }
}

/// Writer counters
#[derive(Debug, Default)]
struct WriterMetrics {
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    stale: AtomicU64,
    pending: AtomicUsize,
}

/// Snapshot of writer counters
#[derive(Debug, Clone, Serialize)]
pub struct WriterStats {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Writes discarded because an invalidation happened after their fetch
    pub stale: u64,
    pub pending: usize,
    pub workers: usize,
}

/// Bounded, fire-and-forget writer in front of a [`ListCache`]
pub struct CacheWriter {
    write_tx: mpsc::Sender<CacheWrite>,
    metrics: Arc<WriterMetrics>,
    worker_count: usize,
}

impl CacheWriter {
    /// Create the queue and start the worker tasks
    pub fn new(cache: Arc<dyn ListCache>, config: WriterConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        let (write_tx, write_rx) = mpsc::channel::<CacheWrite>(config.max_queue_size.max(1));
        let write_rx = Arc::new(tokio::sync::Mutex::new(write_rx));
        let metrics = Arc::new(WriterMetrics::default());

        for i in 0..worker_count {
            let cache = Arc::clone(&cache);
            let write_rx = Arc::clone(&write_rx);
            let metrics = Arc::clone(&metrics);

            tokio::spawn(async move {
                writer_task(i, cache, write_rx, metrics).await;
            });
        }

        info!(
            workers = worker_count,
            queue = config.max_queue_size,
            "Cache writer started"
        );

        Self {
            write_tx,
            metrics,
            worker_count,
        }
    }

    /// Queue a write without waiting. Returns false if it was dropped.
    ///
    /// `generation` is what [`ListCache::generation`] returned before `value`
    /// was read from the store.
    pub fn enqueue(&self, key: String, value: Bytes, ttl: Duration, generation: u64) -> bool {
        self.metrics.pending.fetch_add(1, Ordering::SeqCst);

        let write = CacheWrite {
            key,
            value,
            ttl,
            generation,
        };
        match self.write_tx.try_send(write) {
            Ok(()) => {
                self.metrics.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(write)) => {
                self.metrics.pending.fetch_sub(1, Ordering::SeqCst);
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %write.key, "Cache write queue full, dropping write");
                false
            }
            Err(mpsc::error::TrySendError::Closed(write)) => {
                self.metrics.pending.fetch_sub(1, Ordering::SeqCst);
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %write.key, "Cache writer closed, dropping write");
                false
            }
        }
    }

    /// Wait until every accepted write has been attempted, up to `timeout`.
    /// Returns false if writes were still pending when time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.metrics.pending.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Counter snapshot
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            queued: self.metrics.queued.load(Ordering::Relaxed),
            written: self.metrics.written.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
            stale: self.metrics.stale.load(Ordering::Relaxed),
            pending: self.metrics.pending.load(Ordering::SeqCst),
            workers: self.worker_count,
        }
    }
}

/// Worker task that applies queued writes
async fn writer_task(
    worker_id: usize,
    cache: Arc<dyn ListCache>,
    write_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<CacheWrite>>>,
    metrics: Arc<WriterMetrics>,
) {
    loop {
        let write = {
            let mut rx = write_rx.lock().await;
            match rx.recv().await {
                Some(w) => w,
                None => {
                    debug!("Cache writer {} shutting down (channel closed)", worker_id);
                    return;
                }
            }
        };

        match cache
            .set_if_current(&write.key, write.value, write.ttl, write.generation)
            .await
        {
            Ok(true) => {
                metrics.written.fetch_add(1, Ordering::Relaxed);
                debug!(worker = worker_id, key = %write.key, "Cached list view");
            }
            Ok(false) => {
                metrics.stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker = worker_id,
                    key = %write.key,
                    generation = write.generation,
                    "Discarded list view fetched before an invalidation"
                );
            }
            Err(e) => {
                metrics.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = worker_id, key = %write.key, "Cache write failed: {}", e);
            }
        }

        metrics.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
