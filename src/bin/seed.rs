//! itemgate-seed - bulk-load items straight into MongoDB
//!
//! Inserts `--count` items in batches for one owner, bypassing the command
//! stream. Cached list views are not touched; they expire on their TTL.

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use itemgate::{config::MongoArgs, db::MongoClient, logging, types::Item};

#[derive(Parser, Debug)]
#[command(name = "itemgate-seed")]
#[command(about = "Insert generated items into the item store")]
struct Args {
    #[command(flatten)]
    mongo: MongoArgs,

    /// Number of items to insert
    #[arg(long, default_value = "10000")]
    count: usize,

    /// Items per insert batch
    #[arg(long, default_value = "500")]
    batch_size: usize,

    /// Owner of every seeded item
    #[arg(long, default_value = "seed-user")]
    owner: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Item number `n` (1-based). Later items are newer, so item `count` lists first.
fn seeded_item(n: usize, owner: &str, base: chrono::DateTime<Utc>) -> Item {
    let created = base + ChronoDuration::milliseconds(n as i64);
    Item::new(
        Uuid::new_v4().to_string(),
        owner,
        format!("Item {}", n),
        format!("Description for item {}", n),
        false,
        created,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logging::init(&args.log_level, false);

    let client = match MongoClient::new(&args.mongo.mongodb_uri, &args.mongo.mongodb_db).await {
        Ok(c) => c,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    let store = client.item_store(&args.mongo.mongodb_collection).await?;

    let batch_size = args.batch_size.max(1);
    let base = Utc::now();
    let started = Instant::now();
    let mut inserted = 0;

    for chunk_start in (0..args.count).step_by(batch_size) {
        let chunk_end = (chunk_start + batch_size).min(args.count);
        let items: Vec<Item> = (chunk_start + 1..=chunk_end)
            .map(|n| seeded_item(n, &args.owner, base))
            .collect();

        inserted += store.insert_many(&items).await?;
        info!("Inserted {} / {}", inserted, args.count);
    }

    info!(
        "Done: {} items in {:.2?} ({}.{})",
        inserted,
        started.elapsed(),
        client.db_name(),
        args.mongo.mongodb_collection
    );
    Ok(())
}
