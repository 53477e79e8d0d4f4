//! Command records exchanged between the write submitter and the processor
//!
//! This is the one payload that must stay byte-compatible across replicas:
//! a JSON object with `action`, `id`, `user_id`, `requested_at` and the
//! optional `title` / `description` / `completed` fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::ItemPatch;

/// Mutation carried by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
    /// Any tag this build does not know; consumed without effect
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write intent, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: Action,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub requested_at: DateTime<Utc>,
}

impl Command {
    pub fn create(id: &str, owner_id: &str, title: &str, description: Option<String>) -> Self {
        Self {
            action: Action::Create,
            id: id.to_string(),
            title: Some(title.to_string()),
            description: description.filter(|d| !d.is_empty()),
            completed: None,
            owner_id: owner_id.to_string(),
            requested_at: Utc::now(),
        }
    }

    pub fn update(id: &str, owner_id: &str, patch: ItemPatch) -> Self {
        Self {
            action: Action::Update,
            id: id.to_string(),
            title: patch.title,
            description: patch.description,
            completed: patch.completed,
            owner_id: owner_id.to_string(),
            requested_at: Utc::now(),
        }
    }

    pub fn delete(id: &str, owner_id: &str) -> Self {
        Self {
            action: Action::Delete,
            id: id.to_string(),
            title: None,
            description: None,
            completed: None,
            owner_id: owner_id.to_string(),
            requested_at: Utc::now(),
        }
    }

    /// The optional fields as a merge-patch
    pub fn patch(&self) -> ItemPatch {
        ItemPatch::new(
            self.title.clone(),
            self.description.clone(),
            self.completed,
        )
    }

    /// Milliseconds between submission and `now`
    pub fn lag_ms(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.requested_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<bytes::Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Into::into)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Partition for an owner's commands.
///
/// Derived from the owner alone so every action by one actor lands on the
/// same partition. SHA-256 keeps the mapping identical across processes.
pub fn partition_for(owner_id: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(owner_id.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions
}
