//! Persisted collections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CanonicalKey;

/// One stored resource within a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub key: CanonicalKey,
    pub alt: Option<String>,
    pub stored_at: DateTime<Utc>,
}

/// Named aggregate of resources merged across sessions
///
/// `resources` never holds two entries with the same key and only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
    pub resources: Vec<CollectionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Empty collection for a display name
    pub fn new(display_name: &str, icon_ref: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: collection_id_for(display_name),
            display_name: display_name.trim().to_string(),
            icon_ref,
            resources: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.resources.iter().any(|entry| &entry.key == key)
    }
}

/// Listing row for a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
    pub resource_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Normalized collection identifier for a display name
///
/// Lower-cases, maps every run of non-alphanumeric characters to a single
/// `-` and trims leading/trailing dashes: `"Acme  Bank!"` → `"acme-bank"`.
pub fn collection_id_for(display_name: &str) -> String {
    let mut id = String::with_capacity(display_name.len());
    let mut pending_dash = false;

    for ch in display_name.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !id.is_empty() {
                id.push('-');
            }
            pending_dash = false;
            id.push(ch);
        } else {
            pending_dash = true;
        }
    }

    id
}
