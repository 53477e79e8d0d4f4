//! In-process command channel
//!
//! One unbounded queue per partition. Used in dev mode when NATS is not
//! reachable, and by the test suite, which inspects acks and dead letters.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{CommandChannel, Delivery, PartitionReceiver};
use crate::types::{GateError, Result};

struct Partition {
    tx: mpsc::UnboundedSender<Bytes>,
    /// Taken by the first subscriber
    rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

/// A parked record and the reason it was parked
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub payload: Bytes,
    pub reason: String,
}

/// Memory-backed [`CommandChannel`]
pub struct MemoryChannel {
    partitions: Vec<Partition>,
    available: AtomicBool,
    appended: AtomicU64,
    acked: Arc<AtomicU64>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryChannel {
    pub fn new(partitions: u32) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                Partition {
                    tx,
                    rx: Mutex::new(Some(rx)),
                }
            })
            .collect();

        Self {
            partitions,
            available: AtomicBool::new(true),
            appended: AtomicU64::new(0),
            acked: Arc::new(AtomicU64::new(0)),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Simulate an outage: appends fail and `ping` reports false
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn appended_count(&self) -> u64 {
        self.appended.load(Ordering::SeqCst)
    }

    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    fn partition(&self, partition: u32) -> Result<&Partition> {
        self.partitions.get(partition as usize).ok_or_else(|| {
            GateError::BadRequest(format!(
                "Partition {} out of range (0..{})",
                partition,
                self.partitions.len()
            ))
        })
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    fn partitions(&self) -> u32 {
        self.partitions.len() as u32
    }

    async fn append(&self, partition: u32, payload: Bytes) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(GateError::Unavailable("Command channel unavailable".into()));
        }

        self.partition(partition)?
            .tx
            .send(payload)
            .map_err(|_| GateError::Unavailable("Command channel closed".into()))?;

        self.appended.fetch_add(1, Ordering::SeqCst);
        debug!(partition = partition, "Appended command");
        Ok(())
    }

    async fn subscribe(&self, partition: u32) -> Result<Box<dyn PartitionReceiver>> {
        let rx = self
            .partition(partition)?
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| {
                GateError::Internal(format!("Partition {} already has a consumer", partition))
            })?;

        Ok(Box::new(MemoryReceiver {
            partition,
            rx,
            acked: Arc::clone(&self.acked),
        }))
    }

    async fn dead_letter(&self, payload: Bytes, reason: &str) -> Result<()> {
        warn!(reason = reason, "Dead-lettering command");
        self.dead_letters.lock().await.push(DeadLetter {
            payload,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryReceiver {
    partition: u32,
    rx: mpsc::UnboundedReceiver<Bytes>,
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl PartitionReceiver for MemoryReceiver {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        // recv() is cancel safe
        Ok(self.rx.recv().await.map(|payload| {
            Box::new(MemoryDelivery {
                payload,
                acked: Arc::clone(&self.acked),
            }) as Box<dyn Delivery>
        }))
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}

struct MemoryDelivery {
    payload: Bytes,
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn delivery_count(&self) -> u64 {
        1
    }

    async fn ack(&self) -> Result<()> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partition_preserves_append_order() {
        let channel = MemoryChannel::new(4);
        for n in 0..5u8 {
            channel.append(2, Bytes::from(vec![n])).await.unwrap();
        }

        let mut rx = channel.subscribe(2).await.unwrap();
        for n in 0..5u8 {
            let delivery = rx.next().await.unwrap().expect("record");
            assert_eq!(delivery.payload().as_ref(), &[n]);
            delivery.ack().await.unwrap();
        }

        assert_eq!(channel.appended_count(), 5);
        assert_eq!(channel.acked_count(), 5);
    }

    #[tokio::test]
    async fn test_unavailable_rejects_append() {
        let channel = MemoryChannel::new(1);
        channel.set_available(false);

        let err = channel.append(0, Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, GateError::Unavailable(_)));
        assert!(!channel.ping().await);
        assert_eq!(channel.appended_count(), 0);
    }

    #[tokio::test]
    async fn test_single_consumer_per_partition() {
        let channel = MemoryChannel::new(2);
        assert!(channel.subscribe(1).await.is_ok());
        assert!(channel.subscribe(1).await.is_err());
        assert!(channel.subscribe(7).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_letters_are_recorded() {
        let channel = MemoryChannel::new(1);
        channel
            .dead_letter(Bytes::from_static(b"bad"), "apply failed")
            .await
            .unwrap();

        let parked = channel.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].reason, "apply failed");
    }
}
