//! MongoDB client and item store

use async_trait::async_trait;
use bson::{doc, Document};
use futures_util::TryStreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use tracing::{debug, info};

use super::ItemStore;
use crate::db::schemas::ItemDoc;
use crate::types::{GateError, Item, ItemPatch, Result};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on an unreachable server instead of hanging
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GateError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GateError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open the item collection, applying its indexes
    pub async fn item_store(&self, collection: &str) -> Result<MongoItemStore> {
        let inner = self
            .client
            .database(&self.db_name)
            .collection::<ItemDoc>(collection);

        let store = MongoItemStore {
            client: self.clone(),
            inner,
        };
        store.apply_indexes().await?;
        Ok(store)
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// [`ItemStore`] over a MongoDB collection
#[derive(Clone)]
pub struct MongoItemStore {
    client: MongoClient,
    inner: Collection<ItemDoc>,
}

impl MongoItemStore {
    async fn apply_indexes(&self) -> Result<()> {
        let indices: Vec<IndexModel> = ItemDoc::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| GateError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Bulk insert, used by the seeder
    pub async fn insert_many(&self, items: &[Item]) -> Result<usize> {
        let docs: Vec<ItemDoc> = items.iter().map(ItemDoc::from).collect();

        let result = self
            .inner
            .insert_many(docs)
            .ordered(false)
            .await
            .map_err(|e| GateError::Database(format!("Bulk insert failed: {}", e)))?;

        Ok(result.inserted_ids.len())
    }
}

#[async_trait]
impl ItemStore for MongoItemStore {
    async fn list(&self, limit: Option<u32>) -> Result<Vec<Item>> {
        let mut find = self
            .inner
            .find(doc! {})
            .sort(doc! { "created_at": -1, "_id": -1 });
        if let Some(n) = limit {
            find = find.limit(i64::from(n));
        }

        let cursor = find
            .await
            .map_err(|e| GateError::Database(format!("Find failed: {}", e)))?;

        let docs: Vec<ItemDoc> = cursor
            .try_collect()
            .await
            .map_err(|e| GateError::Database(format!("Cursor failed: {}", e)))?;

        Ok(docs.into_iter().map(Item::from).collect())
    }

    async fn insert_if_absent(&self, item: Item) -> Result<bool> {
        let mut fields = bson::to_document(&ItemDoc::from(&item))
            .map_err(|e| GateError::Internal(format!("Encode failed: {}", e)))?;
        fields.remove("_id");

        // Upsert keyed on _id so a redelivered create changes nothing
        let result = self
            .inner
            .update_one(doc! { "_id": item.id.as_str() }, doc! { "$setOnInsert": fields })
            .upsert(true)
            .await
            .map_err(|e| GateError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.upserted_id.is_some())
    }

    async fn update(&self, id: &str, owner_id: &str, patch: &ItemPatch) -> Result<bool> {
        let mut set = doc! { "updated_at": bson::DateTime::now() };
        if let Some(ref title) = patch.title {
            set.insert("title", title.as_str());
        }
        if let Some(ref description) = patch.description {
            set.insert("description", description.as_str());
        }
        if let Some(completed) = patch.completed {
            set.insert("completed", completed);
        }

        let result = self
            .inner
            .update_one(doc! { "_id": id, "user_id": owner_id }, doc! { "$set": set })
            .await
            .map_err(|e| GateError::Database(format!("Update failed: {}", e)))?;

        debug!(id = id, matched = result.matched_count, "Item update");
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<bool> {
        let result = self
            .inner
            .delete_one(doc! { "_id": id, "user_id": owner_id })
            .await
            .map_err(|e| GateError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count > 0)
    }

    async fn ping(&self) -> bool {
        self.client
            .client
            .database(&self.client.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .is_ok()
    }

    fn backend_name(&self) -> &'static str {
        "mongodb"
    }
}
