//! JetStream command channel
//!
//! One file-backed stream carries every partition on subject
//! `<prefix>.<partition>`. Each partition has a durable pull consumer with
//! `max_ack_pending = 1`, so even when several worker replicas bind the same
//! consumer a partition's records are applied one at a time, in order.
//! Unacknowledged records are redelivered after `ack_wait`.

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream as JsStream};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CommandChannel, Delivery, PartitionReceiver};
use crate::config::NatsArgs;
use crate::nats::NatsClient;
use crate::types::{GateError, Result};

/// Consumer name prefix; the partition number is appended
const CONSUMER_NAME_PREFIX: &str = "itemgate_processor_p";

/// How long a delivered record may stay unacknowledged
const ACK_WAIT: Duration = Duration::from_secs(30);

/// Retention for parked records
const DEAD_LETTER_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Header carrying the reason a record was dead-lettered
const DEAD_REASON_HEADER: &str = "Itemgate-Dead-Reason";

/// JetStream-backed [`CommandChannel`]
pub struct JetStreamChannel {
    nats: NatsClient,
    stream_name: String,
    subject_prefix: String,
    partitions: u32,
    dead_letter_subject: Option<String>,
}

impl JetStreamChannel {
    /// Ensure the command stream (and dead-letter stream, if enabled) exist
    pub async fn open(nats: NatsClient, args: &NatsArgs) -> Result<Self> {
        let channel = Self {
            nats,
            stream_name: args.command_stream.clone(),
            subject_prefix: args.command_subject_prefix.clone(),
            partitions: args.command_partitions,
            dead_letter_subject: args
                .dead_letter
                .then(|| format!("{}.dead", args.command_subject_prefix)),
        };

        channel.ensure_stream().await?;
        channel.ensure_dead_letter_stream().await?;

        Ok(channel)
    }

    /// Subject for one partition
    pub fn subject(&self, partition: u32) -> String {
        format!("{}.{}", self.subject_prefix, partition)
    }

    /// Ensure the command stream exists
    async fn ensure_stream(&self) -> Result<JsStream> {
        // Partition subjects are listed explicitly so `<prefix>.dead` stays
        // free for the dead-letter stream.
        let subjects = (0..self.partitions).map(|p| self.subject(p)).collect();

        let stream = self
            .nats
            .jetstream()
            .get_or_create_stream(jetstream::stream::Config {
                name: self.stream_name.clone(),
                subjects,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| GateError::Nats(format!("Failed to create stream: {e}")))?;

        info!(
            "Using stream {} with {} partitions under {}.*",
            self.stream_name, self.partitions, self.subject_prefix
        );
        Ok(stream)
    }

    async fn ensure_dead_letter_stream(&self) -> Result<()> {
        let Some(subject) = &self.dead_letter_subject else {
            return Ok(());
        };

        let name = format!("{}_DEAD", self.stream_name);
        self.nats
            .jetstream()
            .get_or_create_stream(jetstream::stream::Config {
                name: name.clone(),
                subjects: vec![subject.clone()],
                max_age: DEAD_LETTER_MAX_AGE,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| GateError::Nats(format!("Failed to create dead-letter stream: {e}")))?;

        info!("Dead letters go to {} ({})", subject, name);
        Ok(())
    }

    /// Ensure the durable consumer for one partition exists
    async fn ensure_consumer(&self, partition: u32) -> Result<PullConsumer> {
        let consumer_name = format!("{}{}", CONSUMER_NAME_PREFIX, partition);

        let stream = self
            .nats
            .jetstream()
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| GateError::Nats(format!("Failed to get stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: ACK_WAIT,
                    filter_subject: self.subject(partition),
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| GateError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", consumer_name);
        Ok(consumer)
    }
}

#[async_trait]
impl CommandChannel for JetStreamChannel {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, partition: u32, payload: Bytes) -> Result<()> {
        if partition >= self.partitions {
            return Err(GateError::BadRequest(format!(
                "Partition {} out of range (0..{})",
                partition, self.partitions
            )));
        }

        let subject = self.subject(partition);

        // The second await is the stream's publish ack
        self.nats
            .jetstream()
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| GateError::Unavailable(format!("Publish to {} failed: {}", subject, e)))?
            .await
            .map_err(|e| GateError::Unavailable(format!("No publish ack from {}: {}", subject, e)))?;

        debug!(subject = %subject, "Appended command");
        Ok(())
    }

    async fn subscribe(&self, partition: u32) -> Result<Box<dyn PartitionReceiver>> {
        let consumer = self.ensure_consumer(partition).await?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| GateError::Nats(format!("Failed to open message stream: {e}")))?
            .map(|msg| msg.map_err(|e| GateError::Nats(format!("Receive failed: {e}"))))
            .boxed();

        Ok(Box::new(JetStreamReceiver {
            partition,
            messages,
        }))
    }

    async fn dead_letter(&self, payload: Bytes, reason: &str) -> Result<()> {
        let Some(subject) = &self.dead_letter_subject else {
            return Ok(());
        };

        let mut headers = HeaderMap::new();
        headers.insert(DEAD_REASON_HEADER, reason);

        self.nats
            .jetstream()
            .publish_with_headers(subject.clone(), headers, payload)
            .await
            .map_err(|e| GateError::Nats(format!("Dead-letter publish failed: {e}")))?
            .await
            .map_err(|e| GateError::Nats(format!("No dead-letter ack: {e}")))?;

        warn!(subject = %subject, reason = reason, "Dead-lettered command");
        Ok(())
    }

    async fn ping(&self) -> bool {
        self.nats.is_connected()
    }

    fn backend_name(&self) -> &'static str {
        "jetstream"
    }
}

struct JetStreamReceiver {
    partition: u32,
    messages: BoxStream<'static, Result<jetstream::Message>>,
}

#[async_trait]
impl PartitionReceiver for JetStreamReceiver {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        match self.messages.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(JetStreamDelivery { message }))),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    fn delivery_count(&self) -> u64 {
        self.message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| GateError::Nats(format!("Ack failed: {e}")))
    }
}
