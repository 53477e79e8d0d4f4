//! Backend construction
//!
//! Connects the item store, list cache and command channel once at startup.
//! In dev mode an unreachable MongoDB or NATS is replaced by the in-process
//! implementation instead of aborting.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{spawn_cleanup_task, CacheConfig, ListCache, MemoryListCache, NatsKvListCache};
use crate::channel::{CommandChannel, JetStreamChannel, MemoryChannel};
use crate::config::{CacheArgs, CacheBackend, MongoArgs, NatsArgs};
use crate::db::{ItemStore, MemoryItemStore, MongoClient};
use crate::nats::NatsClient;
use crate::types::Result;

/// Shared handles to the three external collaborators
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ItemStore>,
    pub cache: Arc<dyn ListCache>,
    pub channel: Arc<dyn CommandChannel>,
}

impl Backends {
    /// All in-process: memory store, memory cache, memory channel
    pub fn memory(partitions: u32, cache_config: CacheConfig) -> Self {
        Self {
            store: Arc::new(MemoryItemStore::new()),
            cache: Arc::new(MemoryListCache::new(cache_config)),
            channel: Arc::new(MemoryChannel::new(partitions)),
        }
    }

    /// Connect to MongoDB and NATS
    pub async fn connect(
        mongo: &MongoArgs,
        nats: &NatsArgs,
        cache: &CacheArgs,
        dev_mode: bool,
        client_name: &str,
    ) -> Result<Self> {
        let store = connect_store(mongo, dev_mode).await?;

        let nats_client = match NatsClient::new(nats, client_name).await {
            Ok(client) => Some(client),
            Err(e) if dev_mode => {
                warn!("NATS connection failed (dev mode, using in-process channel and cache): {}", e);
                None
            }
            Err(e) => {
                error!("NATS connection failed: {}", e);
                return Err(e);
            }
        };

        let channel: Arc<dyn CommandChannel> = match nats_client {
            Some(ref client) => Arc::new(JetStreamChannel::open(client.clone(), nats).await?),
            None => Arc::new(MemoryChannel::new(nats.command_partitions)),
        };

        let cache = build_cache(cache, nats_client.as_ref()).await?;

        info!(
            store = store.backend_name(),
            cache = cache.backend_name(),
            channel = channel.backend_name(),
            "Backends ready"
        );

        Ok(Self {
            store,
            cache,
            channel,
        })
    }
}

async fn connect_store(args: &MongoArgs, dev_mode: bool) -> Result<Arc<dyn ItemStore>> {
    let connected = async {
        let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
        client.item_store(&args.mongodb_collection).await
    }
    .await;

    match connected {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Ok(Arc::new(store))
        }
        Err(e) if dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-process store): {}", e);
            Ok(Arc::new(MemoryItemStore::new()))
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            Err(e)
        }
    }
}

async fn build_cache(args: &CacheArgs, nats: Option<&NatsClient>) -> Result<Arc<dyn ListCache>> {
    match (args.cache_backend, nats) {
        (CacheBackend::Nats, Some(client)) => Ok(Arc::new(
            NatsKvListCache::open(client.clone(), &args.cache_bucket, args.ttl()).await?,
        )),
        (CacheBackend::Nats, None) | (CacheBackend::Memory, _) => {
            if args.cache_backend == CacheBackend::Nats {
                warn!("NATS KV cache unavailable, caching list views in memory");
            }
            let cache = Arc::new(MemoryListCache::new(CacheConfig {
                max_entries: args.cache_max_entries,
                ..Default::default()
            }));
            spawn_cleanup_task(Arc::clone(&cache));
            Ok(cache)
        }
    }
}
