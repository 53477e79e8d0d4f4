//! itemgate-worker - standalone command processor
//!
//! Consumes the command stream and applies commands to MongoDB, so consumers
//! can scale separately from the HTTP front. Run with `EMBEDDED_WORKER=false`
//! on the fronts when using this.
//!
//! Usage:
//!   itemgate-worker --nats-url nats://localhost:4222 --worker-partitions 0,1,2,3
//!
//! Environment variables:
//!   NATS_URL, COMMAND_STREAM, COMMAND_SUBJECT_PREFIX, COMMAND_PARTITIONS
//!   WORKER_PARTITIONS - comma-separated partitions to consume (default: all)
//!   MONGODB_URI, MONGODB_DB, MONGODB_COLLECTION
//!   CACHE_BUCKET, CACHE_TTL_SECS (CACHE_BACKEND must be nats)

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use itemgate::{
    config::{CacheArgs, MongoArgs, NatsArgs},
    logging, shutdown,
    worker::{CommandProcessor, ProcessorConfig},
    Backends,
};

#[derive(Parser, Debug)]
#[command(name = "itemgate-worker")]
#[command(about = "Applies queued item commands and invalidates cached lists")]
#[command(version)]
struct Args {
    #[command(flatten)]
    mongo: MongoArgs,

    #[command(flatten)]
    nats: NatsArgs,

    #[command(flatten)]
    cache: CacheArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    // Readers live in other processes, so invalidation must reach a shared cache
    if let Err(e) = args.cache.require_shared() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let partitions = match args.nats.assigned_partitions() {
        Ok(p) if !p.is_empty() => p,
        Ok(_) => {
            error!("No partitions assigned");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting itemgate worker (NATS: {}, partitions: {:?})",
        args.nats.nats_url, partitions
    );

    // A standalone worker is useless without the shared stream, so no dev fallbacks
    let backends = match Backends::connect(&args.mongo, &args.nats, &args.cache, false, "itemgate-worker").await {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to connect backends: {}", e);
            std::process::exit(1);
        }
    };

    let processor = Arc::new(CommandProcessor::new(
        backends.channel,
        backends.store,
        backends.cache,
        ProcessorConfig {
            partitions,
            dead_letter: args.nats.dead_letter,
        },
    ));

    let handle = processor.start();

    shutdown::signal().await;

    info!("Worker shutting down");
    handle.shutdown().await;

    let stats = processor.stats();
    info!(
        received = stats.received,
        applied = stats.applied,
        apply_failures = stats.apply_failures,
        "Worker stopped"
    );
    Ok(())
}
