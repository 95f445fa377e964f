//! Merge engine
//!
//! Reconciles a session's discoveries against a persisted collection.
//! Append-only: existing entries are never removed or modified, new keys are
//! appended in discovery order. Merges into the same collection are
//! serialized by a per-collection async lock so concurrent sessions never
//! lose each other's updates.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use crate::db::CollectionStore;
use crate::models::{
    collection_id_for, CanonicalKey, Collection, CollectionEntry, DiscoveredResource, MergeReport,
};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] glean_common::Error),

    #[error("display name {0:?} does not yield a collection id")]
    InvalidName(String),
}

pub struct MergeEngine {
    store: Arc<dyn CollectionStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CollectionStore> {
        &self.store
    }

    fn lock_for(&self, collection_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection_id.to_string())
            .or_default()
            .clone()
    }

    /// Merge `discovered` into the collection named `display_name`
    ///
    /// The collection is created when missing. `icon_ref` is only applied
    /// when the collection has no icon yet. When nothing changes no write
    /// is issued.
    pub async fn merge(
        &self,
        display_name: &str,
        icon_ref: Option<&str>,
        discovered: &[DiscoveredResource],
    ) -> Result<MergeReport, MergeError> {
        let collection_id = collection_id_for(display_name);
        if collection_id.is_empty() {
            return Err(MergeError::InvalidName(display_name.to_string()));
        }

        let lock = self.lock_for(&collection_id);
        let _guard = lock.lock().await;

        let (mut collection, created) = match self.store.get(&collection_id).await? {
            Some(existing) => (existing, false),
            None => (Collection::new(display_name, None), true),
        };

        let mut known: HashSet<CanonicalKey> =
            collection.resources.iter().map(|e| e.key.clone()).collect();
        let now = Utc::now();
        let mut new_count = 0;

        for resource in discovered {
            if known.insert(resource.key.clone()) {
                collection.resources.push(CollectionEntry {
                    key: resource.key.clone(),
                    alt: resource.alt.clone(),
                    stored_at: now,
                });
                new_count += 1;
            }
        }

        let icon_added = match (collection.icon_ref.is_none(), icon_ref) {
            (true, Some(icon)) => {
                collection.icon_ref = Some(icon.to_string());
                true
            }
            _ => false,
        };

        let report = MergeReport {
            total_count: collection.resources.len(),
            new_count,
        };

        if !created && new_count == 0 && !icon_added {
            debug!(collection_id = %collection_id, "Nothing new to merge");
            return Ok(report);
        }

        collection.updated_at = now;
        self.store.set(&collection).await?;

        info!(
            collection_id = %collection_id,
            new_count,
            total_count = report.total_count,
            "Merged discoveries into collection"
        );
        Ok(report)
    }
}
