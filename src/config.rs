//! Configuration for itemgate
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// itemgate - item list gateway with cached reads and queued writes
#[derive(Parser, Debug, Clone)]
#[command(name = "itemgate")]
#[command(about = "Read-optimized item list gateway with a queue-buffered write path")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (header auth, in-process fallbacks)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Run the command processor inside this process
    #[arg(long, env = "EMBEDDED_WORKER", default_value = "true", action = clap::ArgAction::Set)]
    pub embedded_worker: bool,

    /// MongoDB connection and collection
    #[command(flatten)]
    pub mongo: MongoArgs,

    /// NATS connection and command stream layout
    #[command(flatten)]
    pub nats: NatsArgs,

    /// List cache settings
    #[command(flatten)]
    pub cache: CacheArgs,

    /// JWT secret for bearer token verification (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Per-request wait limit on the read path in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// MongoDB connection configuration
#[derive(Parser, Debug, Clone)]
pub struct MongoArgs {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "itemgate")]
    pub mongodb_db: String,

    /// Collection holding the items
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "items")]
    pub mongodb_collection: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// JetStream stream holding the command log
    #[arg(long, env = "COMMAND_STREAM", default_value = "ITEM_COMMANDS")]
    pub command_stream: String,

    /// Subject prefix; partition N publishes to `<prefix>.N`
    #[arg(long, env = "COMMAND_SUBJECT_PREFIX", default_value = "items.commands")]
    pub command_subject_prefix: String,

    /// Number of command partitions
    #[arg(long, env = "COMMAND_PARTITIONS", default_value = "16")]
    pub command_partitions: u32,

    /// Comma-separated partitions this process consumes (default: all)
    #[arg(long, env = "WORKER_PARTITIONS")]
    pub worker_partitions: Option<String>,

    /// Publish failed commands to the dead-letter subject before acking
    #[arg(long, env = "DEAD_LETTER", default_value = "true", action = clap::ArgAction::Set)]
    pub dead_letter: bool,
}

/// Where list views are cached
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// JetStream key-value bucket shared by every replica
    Nats,
    /// Per-process memory
    Memory,
}

/// List cache configuration
#[derive(Parser, Debug, Clone)]
pub struct CacheArgs {
    /// Cache backend
    #[arg(long, env = "CACHE_BACKEND", value_enum, default_value = "nats")]
    pub cache_backend: CacheBackend,

    /// TTL applied to every cached list view, in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Key-value bucket name for the NATS backend
    #[arg(long, env = "CACHE_BUCKET", default_value = "item_lists")]
    pub cache_bucket: String,

    /// Maximum entries for the memory backend
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "10000")]
    pub cache_max_entries: usize,

    /// Background tasks performing cache writes
    #[arg(long, env = "CACHE_WRITER_WORKERS", default_value = "4")]
    pub cache_writer_workers: usize,

    /// Pending cache writes before new ones are dropped
    #[arg(long, env = "CACHE_WRITER_QUEUE", default_value = "1024")]
    pub cache_writer_queue: usize,
}

impl CacheArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Reject caches that a processor in another process cannot invalidate
    pub fn require_shared(&self) -> Result<(), String> {
        match self.cache_backend {
            CacheBackend::Nats => Ok(()),
            CacheBackend::Memory => Err(
                "CACHE_BACKEND=memory is process-local; commands applied by another process \
                 would never invalidate it (use CACHE_BACKEND=nats)"
                    .to_string(),
            ),
        }
    }
}

impl NatsArgs {
    /// Partitions this process should consume
    pub fn assigned_partitions(&self) -> Result<Vec<u32>, String> {
        let Some(ref list) = self.worker_partitions else {
            return Ok((0..self.command_partitions).collect());
        };

        let mut partitions = Vec::new();
        for part in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let p: u32 = part
                .parse()
                .map_err(|_| format!("WORKER_PARTITIONS entry '{}' is not a number", part))?;
            if p >= self.command_partitions {
                return Err(format!(
                    "WORKER_PARTITIONS entry {} is outside 0..{}",
                    p, self.command_partitions
                ));
            }
            if !partitions.contains(&p) {
                partitions.push(p);
            }
        }
        Ok(partitions)
    }
}

impl Args {
    /// Per-request wait limit on the read path
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match self.jwt_secret {
            Some(ref secret) => Some(secret.clone()),
            None if self.dev_mode => Some("dev-only-insecure-secret".to_string()),
            None => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.nats.command_partitions == 0 {
            return Err("COMMAND_PARTITIONS must be at least 1".to_string());
        }

        self.nats.assigned_partitions()?;

        if self.cache.cache_ttl_secs == 0 {
            return Err("CACHE_TTL_SECS must be greater than zero".to_string());
        }

        if self.cache.cache_writer_workers == 0 || self.cache.cache_writer_queue == 0 {
            return Err("CACHE_WRITER_WORKERS and CACHE_WRITER_QUEUE must be non-zero".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        // Replicas share partition consumers, so the replica applying a
        // command is not necessarily the one holding a reader's view.
        // Without an embedded worker no local processor invalidates at all.
        if !self.dev_mode || !self.embedded_worker {
            self.cache.require_shared()?;
        }

        Ok(())
    }
}
