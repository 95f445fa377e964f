//! Collection persistence

pub mod collections;

use async_trait::async_trait;
use glean_common::Result;

use crate::models::{Collection, CollectionSummary};

pub use collections::{matches_search, SqliteCollectionStore};

/// Keyed store of collections
///
/// `set` replaces the stored view of one collection atomically.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Collection>>;

    async fn set(&self, collection: &Collection) -> Result<()>;

    async fn list(&self) -> Result<Vec<CollectionSummary>>;
}
