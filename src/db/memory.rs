//! In-process item store
//!
//! Used in dev mode when MongoDB is unreachable and throughout the tests.
//! Counts list queries and can be told to fail or to stall, which is how the
//! coalescing and apply-failure paths are exercised.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::ItemStore;
use crate::types::{GateError, Item, ItemPatch, Result};

struct Stored {
    /// Insertion order, breaks created_at ties
    seq: u64,
    item: Item,
}

/// Memory-backed [`ItemStore`]
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<HashMap<String, Stored>>,
    next_seq: AtomicU64,
    list_calls: AtomicU64,
    failing: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `list` queries served (including failed ones)
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make every operation fail with a database error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Look up one item
    pub async fn get(&self, id: &str) -> Option<Item> {
        self.items.read().await.get(id).map(|s| s.item.clone())
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn simulate(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GateError::Database("Store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list(&self, limit: Option<u32>) -> Result<Vec<Item>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        let items = self.items.read().await;
        let mut rows: Vec<&Stored> = items.values().collect();
        rows.sort_by(|a, b| {
            b.item
                .created_at
                .cmp(&a.item.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let take = limit.map(|n| n as usize).unwrap_or(rows.len());
        Ok(rows.into_iter().take(take).map(|s| s.item.clone()).collect())
    }

    async fn insert_if_absent(&self, item: Item) -> Result<bool> {
        self.simulate().await?;

        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Ok(false);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        items.insert(item.id.clone(), Stored { seq, item });
        Ok(true)
    }

    async fn update(&self, id: &str, owner_id: &str, patch: &ItemPatch) -> Result<bool> {
        self.simulate().await?;

        let mut items = self.items.write().await;
        match items.get_mut(id) {
            Some(stored) if stored.item.owner_id == owner_id => {
                patch.apply_to(&mut stored.item, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool> {
        self.simulate().await?;

        let mut items = self.items.write().await;
        match items.get(id) {
            Some(stored) if stored.item.owner_id == owner_id => {
                items.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, owner: &str, title: &str) -> Item {
        Item::new(id, owner, title, "", false, Utc::now())
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_bounded() {
        let store = MemoryItemStore::new();
        for n in 1..=4 {
            store
                .insert_if_absent(item(&format!("t{}", n), "u1", "x"))
                .await
                .unwrap();
        }

        let all = store.list(None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t4", "t3", "t2", "t1"]);

        let first_two = store.list(Some(2)).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].id, "t4");
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryItemStore::new();
        assert!(store.insert_if_absent(item("t1", "u1", "first")).await.unwrap());
        assert!(!store.insert_if_absent(item("t1", "u1", "second")).await.unwrap());
        assert_eq!(store.get("t1").await.unwrap().title, "first");
    }

    #[tokio::test]
    async fn test_update_and_delete_are_owner_scoped() {
        let store = MemoryItemStore::new();
        store.insert_if_absent(item("t1", "x", "A")).await.unwrap();

        let patch = ItemPatch::new(Some("B".into()), None, None);
        assert!(!store.update("t1", "y", &patch).await.unwrap());
        assert!(!store.delete("t1", "y").await.unwrap());
        assert_eq!(store.get("t1").await.unwrap().title, "A");

        assert!(store.update("t1", "x", &patch).await.unwrap());
        assert_eq!(store.get("t1").await.unwrap().title, "B");
        assert!(store.delete("t1", "x").await.unwrap());
        assert!(!store.delete("t1", "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryItemStore::new();
        store.set_failing(true);

        assert!(matches!(store.list(None).await, Err(GateError::Database(_))));
        assert!(!store.ping().await);

        store.set_failing(false);
        assert!(store.list(None).await.unwrap().is_empty());
    }
}
