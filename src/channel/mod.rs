//! Command channel
//!
//! An ordered, partitioned, at-least-once log between the write submitter
//! and the command processor. Records within one partition are delivered in
//! append order and the next record is not handed out until the previous one
//! is acknowledged.

pub mod jetstream;
pub mod memory;

pub use jetstream::JetStreamChannel;
pub use memory::MemoryChannel;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::Result;

/// Append side and subscription factory for the command log
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Number of partitions
    fn partitions(&self) -> u32;

    /// Append a record; returns once the channel has durably accepted it
    async fn append(&self, partition: u32, payload: Bytes) -> Result<()>;

    /// Open the consuming end of one partition
    async fn subscribe(&self, partition: u32) -> Result<Box<dyn PartitionReceiver>>;

    /// Park a record that could not be applied
    async fn dead_letter(&self, payload: Bytes, reason: &str) -> Result<()>;

    /// Whether the channel is reachable
    async fn ping(&self) -> bool;

    /// Short backend name for status output
    fn backend_name(&self) -> &'static str;
}

/// Consuming end of one partition
#[async_trait]
pub trait PartitionReceiver: Send {
    /// Next record, or `None` once the partition is closed.
    ///
    /// Dropping the returned future before it resolves must not lose a
    /// record.
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>>;

    /// Partition this receiver reads
    fn partition(&self) -> u32;
}

/// One delivered record
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &Bytes;

    /// 1 on first delivery, higher on redelivery
    fn delivery_count(&self) -> u64;

    /// Advance the partition past this record
    async fn ack(&self) -> Result<()>;
}
