//! Durable item store
//!
//! The authoritative list of items. Only the command processor mutates it;
//! readers reach it on a cache miss.

pub mod memory;
pub mod mongo;
pub mod schemas;

pub use memory::MemoryItemStore;
pub use mongo::{MongoClient, MongoItemStore};

use async_trait::async_trait;

use crate::types::{Item, ItemPatch, Result};

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Items newest-created first, at most `limit` of them if given
    async fn list(&self, limit: Option<u32>) -> Result<Vec<Item>>;

    /// Insert unless an item with this id exists. Returns true if inserted.
    async fn insert_if_absent(&self, item: Item) -> Result<bool>;

    /// Merge `patch` into the item matching (id, owner). Returns true if one matched.
    async fn update(&self, id: &str, owner_id: &str, patch: &ItemPatch) -> Result<bool>;

    /// Remove the item matching (id, owner). Returns true if one was removed.
    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool>;

    async fn ping(&self) -> bool;

    fn backend_name(&self) -> &'static str;
}
