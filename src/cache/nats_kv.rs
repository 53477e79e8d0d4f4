//! Shared list cache on a JetStream key-value bucket
//!
//! Every replica reads and writes the same bucket, so an invalidation by any
//! processor is visible to every reader. The bucket's `max_age` is the TTL;
//! it applies uniformly to all keys.
//!
//! The generation is the revision of [`GENERATION_KEY`], which sits outside
//! the list prefix and is rewritten at the start of every invalidation.

use async_nats::jetstream::kv;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::keys::LIST_KEY_PREFIX;
use super::ListCache;
use crate::nats::NatsClient;
use crate::types::{GateError, Result};

/// Bumped by every invalidation; its revision is the cache generation
pub const GENERATION_KEY: &str = "items.generation";

/// List cache backed by a NATS KV bucket
pub struct NatsKvListCache {
    nats: NatsClient,
    store: kv::Store,
    bucket: String,
    ttl: Duration,
}

impl NatsKvListCache {
    /// Open the bucket, creating it with `max_age = ttl` if missing
    pub async fn open(nats: NatsClient, bucket: &str, ttl: Duration) -> Result<Self> {
        let js = nats.jetstream();

        let store = match js.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    description: "Cached item list views".to_string(),
                    history: 1,
                    max_age: ttl,
                    ..Default::default()
                })
                .await
                .map_err(|e| GateError::Cache(format!("Failed to create bucket {}: {}", bucket, e)))?,
        };

        info!(bucket = bucket, ttl_secs = ttl.as_secs(), "NATS KV list cache ready");

        Ok(Self {
            nats,
            store,
            bucket: bucket.to_string(),
            ttl,
        })
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ListCache for NatsKvListCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let value = self
            .store
            .get(key)
            .await
            .map_err(|e| GateError::Cache(format!("Get {} failed: {}", key, e)))?;

        debug!(key = key, hit = value.is_some(), "KV cache lookup");
        Ok(value)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        if ttl != self.ttl {
            debug!(
                key = key,
                requested_secs = ttl.as_secs(),
                bucket_secs = self.ttl.as_secs(),
                "Per-key TTL ignored; bucket max_age applies"
            );
        }

        self.store
            .put(key, value)
            .await
            .map_err(|e| GateError::Cache(format!("Put {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| GateError::Cache(format!("Delete {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn invalidate_lists(&self) -> Result<usize> {
        let stamp = Bytes::from(chrono::Utc::now().to_rfc3339());
        self.store
            .put(GENERATION_KEY, stamp)
            .await
            .map_err(|e| GateError::Cache(format!("Generation bump failed: {}", e)))?;

        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| GateError::Cache(format!("Key listing failed: {}", e)))?;

        let mut doomed = Vec::new();
        while let Some(key) = keys.next().await {
            match key {
                Ok(key) if key.starts_with(LIST_KEY_PREFIX) => doomed.push(key),
                Ok(_) => {}
                Err(e) => warn!(bucket = %self.bucket, "Skipping unreadable key: {}", e),
            }
        }

        let mut removed = 0;
        for key in &doomed {
            self.store
                .delete(key)
                .await
                .map_err(|e| GateError::Cache(format!("Delete {} failed: {}", key, e)))?;
            removed += 1;
        }

        debug!(bucket = %self.bucket, removed = removed, "Invalidated list views");
        Ok(removed)
    }

    async fn generation(&self) -> Result<u64> {
        let entry = self
            .store
            .entry(GENERATION_KEY)
            .await
            .map_err(|e| GateError::Cache(format!("Generation read failed: {}", e)))?;

        // Absent until the first invalidation, or after max_age expired it
        Ok(entry.map(|e| e.revision).unwrap_or(0))
    }

    async fn ping(&self) -> bool {
        self.nats.is_connected()
    }

    fn backend_name(&self) -> &'static str {
        "nats-kv"
    }
}
