//! SQLite collection store
//!
//! One `collections` row per collection, one `collection_resources` row per
//! stored resource. Resources are only ever inserted: `set` upserts the
//! collection row and inserts entries that are not stored yet, inside a
//! single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glean_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use super::CollectionStore;
use crate::models::{CanonicalKey, Collection, CollectionEntry, CollectionSummary};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

#[derive(Clone)]
pub struct SqliteCollectionStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteCollectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write(&self, collection: &Collection) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO collections (id, display_name, icon_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                icon_ref = excluded.icon_ref,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.display_name)
        .bind(&collection.icon_ref)
        .bind(collection.created_at.to_rfc3339())
        .bind(collection.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (position, entry) in collection.resources.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO collection_resources
                    (collection_id, position, resource_key, alt, stored_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&collection.id)
            .bind(position as i64)
            .bind(entry.key.as_str())
            .bind(&entry.alt)
            .bind(entry.stored_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

#[async_trait]
impl CollectionStore for SqliteCollectionStore {
    async fn get(&self, id: &str) -> Result<Option<Collection>> {
        let row = sqlx::query(
            "SELECT id, display_name, icon_ref, created_at, updated_at FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT resource_key, alt, stored_at
            FROM collection_resources
            WHERE collection_id = ?
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let resources = rows
            .iter()
            .map(|r| {
                Ok(CollectionEntry {
                    key: CanonicalKey::from_stored(r.get::<String, _>("resource_key")),
                    alt: r.get("alt"),
                    stored_at: parse_timestamp(&r.get::<String, _>("stored_at"), "stored_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Collection {
            id: row.get("id"),
            display_name: row.get("display_name"),
            icon_ref: row.get("icon_ref"),
            resources,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"), "created_at")?,
            updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "updated_at")?,
        }))
    }

    async fn set(&self, collection: &Collection) -> Result<()> {
        retry_on_lock("set_collection", self.max_lock_wait_ms, || {
            self.write(collection)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<CollectionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.display_name, c.icon_ref, c.updated_at,
                   COUNT(r.resource_key) AS resource_count
            FROM collections c
            LEFT JOIN collection_resources r ON r.collection_id = c.id
            GROUP BY c.id
            ORDER BY c.updated_at DESC, c.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CollectionSummary {
                    id: row.get("id"),
                    display_name: row.get("display_name"),
                    icon_ref: row.get("icon_ref"),
                    resource_count: row.get::<i64, _>("resource_count") as usize,
                    updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "updated_at")?,
                })
            })
            .collect()
    }
}

/// Case-insensitive display-name substring filter; blank queries match all
pub fn matches_search(summary: &CollectionSummary, query: &str) -> bool {
    let query = query.trim();
    query.is_empty()
        || summary
            .display_name
            .to_lowercase()
            .contains(&query.to_lowercase())
}
