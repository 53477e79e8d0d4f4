//! Item model
//!
//! The JSON shape is what readers receive from `GET /items` (and what the
//! list cache stores verbatim).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single item in the list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Globally unique, immutable after creation
    pub id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
    /// Owning actor, immutable after creation
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Build a freshly created item with both timestamps set to `now`
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            completed,
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Merge-patch for an item: only the fields that are present change.
///
/// Empty strings count as absent, so an update can never blank out a title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl ItemPatch {
    /// Build a patch, dropping empty strings
    pub fn new(title: Option<String>, description: Option<String>, completed: Option<bool>) -> Self {
        Self {
            title: title.filter(|t| !t.is_empty()),
            description: description.filter(|d| !d.is_empty()),
            completed,
        }
    }

    /// True when applying the patch would change nothing
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.completed.is_none()
    }

    /// Apply the present fields to `item`, bumping `updated_at`
    pub fn apply_to(&self, item: &mut Item, now: DateTime<Utc>) {
        if let Some(ref title) = self.title {
            item.title = title.clone();
        }
        if let Some(ref description) = self.description {
            item.description = description.clone();
        }
        if let Some(completed) = self.completed {
            item.completed = completed;
        }
        item.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_json_uses_user_id() {
        let item = Item::new("t1", "u1", "Buy milk", "", false, Utc::now());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert!(json.get("owner_id").is_none());
    }

    #[test]
    fn test_patch_drops_empty_strings() {
        let patch = ItemPatch::new(Some(String::new()), Some(String::new()), None);
        assert!(patch.is_empty());
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let created = Utc::now();
        let mut item = Item::new("t1", "u1", "A", "desc", false, created);
        let patch = ItemPatch::new(None, None, Some(true));

        patch.apply_to(&mut item, created + chrono::Duration::seconds(5));

        assert_eq!(item.title, "A");
        assert_eq!(item.description, "desc");
        assert!(item.completed);
        assert!(item.updated_at > item.created_at);
    }
}
