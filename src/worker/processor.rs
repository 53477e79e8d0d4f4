//! Command processor
//!
//! One loop per assigned partition. Each loop takes a record, applies it to
//! the item store, invalidates every cached list view and acknowledges the
//! record before asking for the next one. A record that fails to apply is
//! counted, optionally dead-lettered, and acknowledged anyway so a single bad
//! record cannot stall its partition.

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::ListCache;
use crate::channel::{CommandChannel, Delivery, PartitionReceiver};
use crate::commands::{Action, Command};
use crate::db::ItemStore;
use crate::types::{Item, Result};

/// Delay before retrying a failed subscribe or receive
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// What applying a command did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The store changed
    Applied,
    /// Known action with nothing to change (duplicate create, owner mismatch, missing id)
    NoOp,
    /// Unknown action
    Ignored,
}

/// Processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Partitions this process consumes
    pub partitions: Vec<u32>,
    /// Dead-letter records that fail to decode or apply
    pub dead_letter: bool,
}

#[derive(Debug, Default)]
struct ProcessorMetrics {
    received: AtomicU64,
    applied: AtomicU64,
    noops: AtomicU64,
    ignored: AtomicU64,
    redelivered: AtomicU64,
    decode_failures: AtomicU64,
    apply_failures: AtomicU64,
    dead_lettered: AtomicU64,
    invalidation_failures: AtomicU64,
    ack_failures: AtomicU64,
    receive_failures: AtomicU64,
    stream_ends: AtomicU64,
    last_lag_ms: AtomicU64,
    max_lag_ms: AtomicU64,
}

/// Snapshot of processor counters
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStats {
    pub partitions: Vec<u32>,
    pub received: u64,
    pub applied: u64,
    pub noops: u64,
    pub ignored: u64,
    pub redelivered: u64,
    pub decode_failures: u64,
    pub apply_failures: u64,
    pub dead_lettered: u64,
    pub invalidation_failures: u64,
    pub ack_failures: u64,
    pub receive_failures: u64,
    /// Partition streams that ended outside shutdown and were reopened
    pub stream_ends: u64,
    /// Consistency lag of the most recent applied command
    pub last_lag_ms: u64,
    pub max_lag_ms: u64,
}

/// Consumes the command channel and applies commands to the store
pub struct CommandProcessor {
    channel: Arc<dyn CommandChannel>,
    store: Arc<dyn ItemStore>,
    cache: Arc<dyn ListCache>,
    config: ProcessorConfig,
    metrics: ProcessorMetrics,
}

/// Running partition loops
pub struct ProcessorHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessorHandle {
    /// Stop every loop after its in-flight record and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Partition loop ended abnormally: {}", e);
            }
        }
        info!("Command processor stopped");
    }
}

impl CommandProcessor {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        store: Arc<dyn ItemStore>,
        cache: Arc<dyn ListCache>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            channel,
            store,
            cache,
            config,
            metrics: ProcessorMetrics::default(),
        }
    }

    /// Spawn one loop per assigned partition
    pub fn start(self: &Arc<Self>) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = self
            .config
            .partitions
            .iter()
            .map(|&partition| {
                let processor = Arc::clone(self);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { processor.run_partition(partition, shutdown).await })
            })
            .collect();

        info!(
            partitions = ?self.config.partitions,
            channel = self.channel.backend_name(),
            store = self.store.backend_name(),
            cache = self.cache.backend_name(),
            "Command processor started"
        );

        ProcessorHandle { shutdown_tx, tasks }
    }

    async fn run_partition(&self, partition: u32, mut shutdown: watch::Receiver<bool>) {
        'subscribe: while let Some(mut receiver) =
            self.subscribe_with_retry(partition, &mut shutdown).await
        {
            info!(partition = partition, "Partition loop running");

            loop {
                if *shutdown.borrow() {
                    break 'subscribe;
                }

                // Only the receive is raced against shutdown; a record in hand
                // is always finished.
                let next = tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break 'subscribe;
                        }
                        continue;
                    }
                    next = receiver.next() => next,
                };

                match next {
                    Ok(Some(delivery)) => self.handle(delivery.as_ref()).await,
                    Ok(None) => {
                        // Not a shutdown: the consumer went away underneath us
                        self.metrics.stream_ends.fetch_add(1, Ordering::Relaxed);
                        error!(partition = partition, "Partition stream ended, resubscribing");
                        if !self.pause(&mut shutdown).await {
                            break 'subscribe;
                        }
                        continue 'subscribe;
                    }
                    Err(e) => {
                        self.metrics.receive_failures.fetch_add(1, Ordering::Relaxed);
                        error!(partition = partition, "Receive failed: {}", e);
                        if !self.pause(&mut shutdown).await {
                            break 'subscribe;
                        }
                    }
                }
            }
        }

        info!(partition = partition, "Partition loop stopped");
    }

    /// Wait out `RETRY_DELAY`. False if shutdown was requested meanwhile.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => true,
            changed = shutdown.changed() => !(changed.is_err() || *shutdown.borrow()),
        }
    }

    async fn subscribe_with_retry(
        &self,
        partition: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn PartitionReceiver>> {
        loop {
            match self.channel.subscribe(partition).await {
                Ok(receiver) => return Some(receiver),
                Err(e) => {
                    error!(partition = partition, "Subscribe failed, retrying in 1s: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RETRY_DELAY) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    /// Process one delivered record end to end
    pub async fn handle(&self, delivery: &dyn Delivery) {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        if delivery.delivery_count() > 1 {
            self.metrics.redelivered.fetch_add(1, Ordering::Relaxed);
            debug!(count = delivery.delivery_count(), "Redelivered command");
        }

        match Command::from_bytes(delivery.payload()) {
            Ok(command) => self.process(&command, delivery).await,
            Err(e) => {
                self.metrics.decode_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    payload = %String::from_utf8_lossy(delivery.payload()),
                    "Failed to decode command: {}",
                    e
                );
                self.park(delivery, &format!("decode: {}", e)).await;
            }
        }

        if let Err(e) = delivery.ack().await {
            self.metrics.ack_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to ack command: {}", e);
        }
    }

    async fn process(&self, command: &Command, delivery: &dyn Delivery) {
        match self.apply(command).await {
            Ok(ApplyOutcome::Ignored) => {
                self.metrics.ignored.fetch_add(1, Ordering::Relaxed);
                debug!(id = %command.id, "Ignoring command with unknown action");
            }
            Ok(outcome) => {
                let counter = match outcome {
                    ApplyOutcome::Applied => &self.metrics.applied,
                    _ => &self.metrics.noops,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                let lag_ms = command.lag_ms(Utc::now());
                self.metrics.last_lag_ms.store(lag_ms, Ordering::Relaxed);
                self.metrics.max_lag_ms.fetch_max(lag_ms, Ordering::Relaxed);

                debug!(
                    id = %command.id,
                    action = %command.action,
                    outcome = ?outcome,
                    lag_ms = lag_ms,
                    "Command applied"
                );

                if let Err(e) = self.cache.invalidate_lists().await {
                    self.metrics.invalidation_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %command.id, "List invalidation failed, TTL applies: {}", e);
                }
            }
            Err(e) => {
                self.metrics.apply_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    id = %command.id,
                    action = %command.action,
                    payload = %String::from_utf8_lossy(delivery.payload()),
                    "Failed to apply command: {}",
                    e
                );
                self.park(delivery, &format!("apply: {}", e)).await;
            }
        }
    }

    /// Apply a command to the store
    pub async fn apply(&self, command: &Command) -> Result<ApplyOutcome> {
        let changed = match command.action {
            Action::Create => {
                let item = Item::new(
                    command.id.as_str(),
                    command.owner_id.as_str(),
                    command.title.clone().unwrap_or_default(),
                    command.description.clone().unwrap_or_default(),
                    command.completed.unwrap_or(false),
                    Utc::now(),
                );
                self.store.insert_if_absent(item).await?
            }
            Action::Update => {
                self.store
                    .update(&command.id, &command.owner_id, &command.patch())
                    .await?
            }
            Action::Delete => self.store.delete(&command.id, &command.owner_id).await?,
            Action::Unknown => return Ok(ApplyOutcome::Ignored),
        };

        Ok(if changed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::NoOp
        })
    }

    async fn park(&self, delivery: &dyn Delivery, reason: &str) {
        if !self.config.dead_letter {
            return;
        }
        match self
            .channel
            .dead_letter(delivery.payload().clone(), reason)
            .await
        {
            Ok(()) => {
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!("Failed to dead-letter command: {}", e),
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        let m = &self.metrics;
        ProcessorStats {
            partitions: self.config.partitions.clone(),
            received: m.received.load(Ordering::Relaxed),
            applied: m.applied.load(Ordering::Relaxed),
            noops: m.noops.load(Ordering::Relaxed),
            ignored: m.ignored.load(Ordering::Relaxed),
            redelivered: m.redelivered.load(Ordering::Relaxed),
            decode_failures: m.decode_failures.load(Ordering::Relaxed),
            apply_failures: m.apply_failures.load(Ordering::Relaxed),
            dead_lettered: m.dead_lettered.load(Ordering::Relaxed),
            invalidation_failures: m.invalidation_failures.load(Ordering::Relaxed),
            ack_failures: m.ack_failures.load(Ordering::Relaxed),
            receive_failures: m.receive_failures.load(Ordering::Relaxed),
            stream_ends: m.stream_ends.load(Ordering::Relaxed),
            last_lag_ms: m.last_lag_ms.load(Ordering::Relaxed),
            max_lag_ms: m.max_lag_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryListCache, QueryShape};
    use crate::channel::MemoryChannel;
    use crate::db::MemoryItemStore;
    use crate::types::ItemPatch;
    use bytes::Bytes;

    struct Fixture {
        channel: Arc<MemoryChannel>,
        store: Arc<MemoryItemStore>,
        cache: Arc<MemoryListCache>,
        processor: Arc<CommandProcessor>,
    }

    fn fixture() -> Fixture {
        let channel = Arc::new(MemoryChannel::new(1));
        let store = Arc::new(MemoryItemStore::new());
        let cache = Arc::new(MemoryListCache::with_defaults());
        let processor = Arc::new(CommandProcessor::new(
            channel.clone(),
            store.clone(),
            cache.clone(),
            ProcessorConfig {
                partitions: vec![0],
                dead_letter: true,
            },
        ));
        Fixture {
            channel,
            store,
            cache,
            processor,
        }
    }

    async fn feed(f: &Fixture, payloads: Vec<Bytes>) {
        let count = payloads.len() as u64;
        for payload in payloads {
            f.channel.append(0, payload).await.unwrap();
        }
        let handle = f.processor.start();
        while f.channel.acked_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;
    }

    fn cmd(command: Command) -> Bytes {
        command.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_create_defaults_and_invalidates() {
        let f = fixture();
        f.cache.insert(
            &QueryShape::All.storage_key(),
            Bytes::from_static(b"[]"),
            Duration::from_secs(300),
        );

        feed(&f, vec![cmd(Command::create("t1", "u1", "Buy milk", None))]).await;

        let item = f.store.get("t1").await.expect("created");
        assert_eq!(item.title, "Buy milk");
        assert!(!item.completed);
        assert_eq!(f.cache.stats().entries, 0);
        assert_eq!(f.processor.stats().applied, 1);
    }

    #[tokio::test]
    async fn test_partition_applied_in_order() {
        let f = fixture();
        let patch = ItemPatch::new(Some("second".into()), None, None);
        feed(
            &f,
            vec![
                cmd(Command::create("t1", "u1", "first", None)),
                cmd(Command::update("t1", "u1", patch)),
                cmd(Command::delete("t1", "u1")),
                cmd(Command::create("t2", "u1", "kept", None)),
            ],
        )
        .await;

        assert!(f.store.get("t1").await.is_none());
        assert_eq!(f.store.get("t2").await.unwrap().title, "kept");
        assert_eq!(f.processor.stats().applied, 4);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_noop() {
        let f = fixture();
        let create = cmd(Command::create("t1", "u1", "once", None));
        feed(&f, vec![create.clone(), create]).await;

        assert_eq!(f.store.len().await, 1);
        let stats = f.processor.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.noops, 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_acked_without_invalidation() {
        let f = fixture();
        let key = QueryShape::First(3).storage_key();
        f.cache
            .insert(&key, Bytes::from_static(b"[]"), Duration::from_secs(300));

        let payload = Bytes::from_static(
            br#"{"action":"archive","id":"t1","user_id":"u1","requested_at":"2024-01-01T00:00:00Z"}"#,
        );
        feed(&f, vec![payload]).await;

        assert_eq!(f.processor.stats().ignored, 1);
        assert!(f.cache.get_entry(&key).is_some());
        assert_eq!(f.channel.acked_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_failure_is_counted_dead_lettered_and_acked() {
        let f = fixture();
        f.store.set_failing(true);

        feed(&f, vec![cmd(Command::create("t1", "u1", "lost", None))]).await;

        let stats = f.processor.stats();
        assert_eq!(stats.apply_failures, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(f.channel.acked_count(), 1);
        assert_eq!(f.channel.dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_acked() {
        let f = fixture();
        feed(&f, vec![Bytes::from_static(b"not json")]).await;

        let stats = f.processor.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(f.channel.acked_count(), 1);
    }

    struct EndedReceiver {
        partition: u32,
    }

    #[async_trait::async_trait]
    impl PartitionReceiver for EndedReceiver {
        async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>> {
            Ok(None)
        }

        fn partition(&self) -> u32 {
            self.partition
        }
    }

    /// First subscribe hands out a stream that is already over
    struct ClosingOnceChannel {
        inner: MemoryChannel,
        subscribes: AtomicU64,
    }

    #[async_trait::async_trait]
    impl CommandChannel for ClosingOnceChannel {
        fn partitions(&self) -> u32 {
            self.inner.partitions()
        }

        async fn append(&self, partition: u32, payload: Bytes) -> Result<()> {
            self.inner.append(partition, payload).await
        }

        async fn subscribe(&self, partition: u32) -> Result<Box<dyn PartitionReceiver>> {
            if self.subscribes.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Box::new(EndedReceiver { partition }));
            }
            self.inner.subscribe(partition).await
        }

        async fn dead_letter(&self, payload: Bytes, reason: &str) -> Result<()> {
            self.inner.dead_letter(payload, reason).await
        }

        async fn ping(&self) -> bool {
            true
        }

        fn backend_name(&self) -> &'static str {
            "closing-once"
        }
    }

    fn closing_once() -> (Arc<ClosingOnceChannel>, Arc<MemoryItemStore>, Arc<CommandProcessor>) {
        let channel = Arc::new(ClosingOnceChannel {
            inner: MemoryChannel::new(1),
            subscribes: AtomicU64::new(0),
        });
        let store = Arc::new(MemoryItemStore::new());
        let processor = Arc::new(CommandProcessor::new(
            channel.clone(),
            store.clone(),
            Arc::new(MemoryListCache::with_defaults()),
            ProcessorConfig {
                partitions: vec![0],
                dead_letter: false,
            },
        ));
        (channel, store, processor)
    }

    #[tokio::test]
    async fn test_ended_stream_is_reopened() {
        let (channel, store, processor) = closing_once();
        channel
            .append(0, cmd(Command::create("t1", "u1", "after reopen", None)))
            .await
            .unwrap();

        let handle = processor.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.inner.acked_count() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("record applied after resubscribing");
        handle.shutdown().await;

        assert_eq!(store.get("t1").await.unwrap().title, "after reopen");
        assert_eq!(channel.subscribes.load(Ordering::SeqCst), 2);
        let stats = processor.stats();
        assert_eq!(stats.stream_ends, 1);
        assert_eq!(stats.applied, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_delay() {
        let (channel, _, processor) = closing_once();
        let handle = processor.start();

        // Let the first stream end so the loop sits in its retry delay
        tokio::time::timeout(Duration::from_secs(1), async {
            while processor.stats().stream_ends < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream end observed");

        tokio::time::timeout(RETRY_DELAY / 2, handle.shutdown())
            .await
            .expect("shutdown does not wait out the retry delay");
        assert_eq!(channel.subscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loops() {
        let f = fixture();
        let handle = f.processor.start();
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("loops stop promptly");
    }
}
