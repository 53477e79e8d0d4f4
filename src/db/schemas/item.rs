//! Item document schema

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::types::Item;

/// Item document stored in MongoDB, keyed by the item id
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ItemDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    pub user_id: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl From<&Item> for ItemDoc {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            completed: item.completed,
            user_id: item.owner_id.clone(),
            created_at: DateTime::from_chrono(item.created_at),
            updated_at: DateTime::from_chrono(item.updated_at),
        }
    }
}

impl From<ItemDoc> for Item {
    fn from(doc: ItemDoc) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            description: doc.description,
            completed: doc.completed,
            owner_id: doc.user_id,
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

impl IntoIndexes for ItemDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Newest-first listing
            (
                doc! { "created_at": -1, "_id": -1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_desc".to_string())
                        .build(),
                ),
            ),
            // Owner-scoped update and delete
            (
                doc! { "user_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("user_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
