//! itemgate - HTTP front with an optional embedded command processor

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use itemgate::{
    config::Args,
    logging, server, shutdown,
    worker::{CommandProcessor, ProcessorConfig},
    AppState, Backends,
};

/// How long buffered cache writes may take to flush on shutdown
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  itemgate");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} ({}.{})", args.mongo.mongodb_uri, args.mongo.mongodb_db, args.mongo.mongodb_collection);
    info!("NATS: {}", args.nats.nats_url);
    info!(
        "Commands: stream {} on {}.<0..{}>",
        args.nats.command_stream, args.nats.command_subject_prefix, args.nats.command_partitions
    );
    info!("Cache: {:?}, TTL {}s", args.cache.cache_backend, args.cache.cache_ttl_secs);
    info!("Embedded worker: {}", args.embedded_worker);
    info!("======================================");

    let backends = match Backends::connect(
        &args.mongo,
        &args.nats,
        &args.cache,
        args.dev_mode,
        &format!("itemgate-{}", args.node_id),
    )
    .await
    {
        Ok(backends) => backends,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if backends.cache.backend_name() == "memory" && backends.channel.backend_name() == "jetstream" {
        warn!("List cache is process-local while commands go through JetStream: other replicas and workers cannot invalidate it, so views may stay stale for the full TTL");
    }

    let mut state = AppState::new(args.clone(), backends.clone())?;

    let processor = if args.embedded_worker {
        let partitions = args.nats.assigned_partitions().map_err(anyhow::Error::msg)?;
        let processor = Arc::new(CommandProcessor::new(
            Arc::clone(&backends.channel),
            Arc::clone(&backends.store),
            Arc::clone(&backends.cache),
            ProcessorConfig {
                partitions,
                dead_letter: args.nats.dead_letter,
            },
        ));
        state = state.with_processor(Arc::clone(&processor));
        Some(processor.start())
    } else {
        if backends.channel.backend_name() == "memory" {
            warn!("In-process command channel without an embedded worker: writes will never be applied");
        }
        None
    };

    let state = Arc::new(state);

    let served = server::run(Arc::clone(&state), shutdown::signal()).await;

    if let Some(handle) = processor {
        handle.shutdown().await;
    }

    if !state.writer.drain(WRITER_DRAIN_TIMEOUT).await {
        warn!("Cache writer still had pending writes at shutdown");
    }

    served?;
    info!("itemgate stopped");
    Ok(())
}
