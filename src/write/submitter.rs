//! Write submitter
//!
//! Validates a mutation, turns it into a [`Command`] and appends it to the
//! owner's partition. Acceptance means the command is durably queued, not
//! that it has been applied.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::CommandChannel;
use crate::commands::{partition_for, Action, Command};
use crate::types::{GateError, ItemPatch, Result};

/// Acknowledgement returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub id: String,
    pub action: Action,
    pub partition: u32,
}

#[derive(Debug, Default)]
struct SubmitMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    channel_failures: AtomicU64,
}

/// Snapshot of submit counters
#[derive(Debug, Clone, Serialize)]
pub struct SubmitStats {
    pub accepted: u64,
    pub rejected: u64,
    pub channel_failures: u64,
}

pub struct WriteSubmitter {
    channel: Arc<dyn CommandChannel>,
    metrics: SubmitMetrics,
}

impl WriteSubmitter {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            channel,
            metrics: SubmitMetrics::default(),
        }
    }

    /// Queue creation of a new item; the id is assigned here
    pub async fn create(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<Accepted> {
        self.require_owner(owner_id)?;
        if title.trim().is_empty() {
            return Err(self.reject("title is required"));
        }

        let id = Uuid::new_v4().to_string();
        self.submit(Command::create(&id, owner_id, title, description))
            .await
    }

    /// Queue a merge-patch of an existing item
    pub async fn update(&self, owner_id: &str, id: &str, patch: ItemPatch) -> Result<Accepted> {
        self.require_owner(owner_id)?;
        self.require_id(id)?;
        self.submit(Command::update(id, owner_id, patch)).await
    }

    /// Queue removal of an item
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<Accepted> {
        self.require_owner(owner_id)?;
        self.require_id(id)?;
        self.submit(Command::delete(id, owner_id)).await
    }

    /// Append a prepared command to its owner's partition
    pub async fn submit(&self, command: Command) -> Result<Accepted> {
        let partition = partition_for(&command.owner_id, self.channel.partitions());
        let payload = command
            .to_bytes()
            .map_err(|e| GateError::Internal(format!("Failed to encode command: {}", e)))?;

        if let Err(e) = self.channel.append(partition, payload).await {
            self.metrics.channel_failures.fetch_add(1, Ordering::Relaxed);
            warn!(id = %command.id, action = %command.action, "Command append failed: {}", e);
            return Err(match e {
                GateError::BadRequest(_) | GateError::Unavailable(_) => e,
                other => GateError::Unavailable(other.to_string()),
            });
        }

        self.metrics.accepted.fetch_add(1, Ordering::Relaxed);
        info!(
            id = %command.id,
            action = %command.action,
            partition = partition,
            "Command accepted"
        );

        Ok(Accepted {
            id: command.id,
            action: command.action,
            partition,
        })
    }

    pub fn stats(&self) -> SubmitStats {
        SubmitStats {
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            channel_failures: self.metrics.channel_failures.load(Ordering::Relaxed),
        }
    }

    fn require_owner(&self, owner_id: &str) -> Result<()> {
        if owner_id.trim().is_empty() {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(GateError::Unauthorized("No authenticated owner".into()));
        }
        Ok(())
    }

    fn require_id(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(self.reject("id is required"));
        }
        Ok(())
    }

    fn reject(&self, reason: &str) -> GateError {
        self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
        GateError::BadRequest(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    fn submitter(partitions: u32) -> (Arc<MemoryChannel>, WriteSubmitter) {
        let channel = Arc::new(MemoryChannel::new(partitions));
        (channel.clone(), WriteSubmitter::new(channel))
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_owner_partition() {
        let (channel, submitter) = submitter(8);

        let accepted = submitter.create("u1", "Buy milk", None).await.unwrap();
        assert!(Uuid::parse_str(&accepted.id).is_ok());
        assert_eq!(accepted.action, Action::Create);
        assert_eq!(accepted.partition, partition_for("u1", 8));

        let mut rx = channel.subscribe(accepted.partition).await.unwrap();
        let delivery = rx.next().await.unwrap().expect("queued command");
        let command = Command::from_bytes(delivery.payload()).unwrap();
        assert_eq!(command.id, accepted.id);
        assert_eq!(command.title.as_deref(), Some("Buy milk"));
        assert_eq!(command.owner_id, "u1");
    }

    #[tokio::test]
    async fn test_validation_never_reaches_channel() {
        let (channel, submitter) = submitter(4);

        assert!(matches!(
            submitter.create("u1", "   ", None).await,
            Err(GateError::BadRequest(_))
        ));
        assert!(matches!(
            submitter.create("", "title", None).await,
            Err(GateError::Unauthorized(_))
        ));
        assert!(matches!(
            submitter.delete("u1", "").await,
            Err(GateError::BadRequest(_))
        ));

        assert_eq!(channel.appended_count(), 0);
        assert_eq!(submitter.stats().rejected, 3);
    }

    #[tokio::test]
    async fn test_channel_outage_is_retryable() {
        let (channel, submitter) = submitter(4);
        channel.set_available(false);

        let err = submitter.delete("u1", "t1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), hyper::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(submitter.stats().channel_failures, 1);
        assert_eq!(submitter.stats().accepted, 0);
    }

    #[tokio::test]
    async fn test_same_owner_same_partition_in_order() {
        let (channel, submitter) = submitter(16);

        let created = submitter.create("u9", "A", None).await.unwrap();
        let patch = ItemPatch::new(None, None, Some(true));
        let updated = submitter.update("u9", &created.id, patch).await.unwrap();
        let deleted = submitter.delete("u9", &created.id).await.unwrap();
        assert_eq!(created.partition, updated.partition);
        assert_eq!(updated.partition, deleted.partition);

        let mut rx = channel.subscribe(created.partition).await.unwrap();
        let mut actions = Vec::new();
        for _ in 0..3 {
            let delivery = rx.next().await.unwrap().unwrap();
            actions.push(Command::from_bytes(delivery.payload()).unwrap().action);
        }
        assert_eq!(actions, vec![Action::Create, Action::Update, Action::Delete]);
    }
}
