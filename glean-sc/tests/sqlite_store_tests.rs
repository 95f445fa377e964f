//! SQLite collection store tests against file-backed databases

mod helpers;

use chrono::{Duration, Utc};
use glean_common::db::init_database;
use glean_sc::db::{CollectionStore, SqliteCollectionStore};
use glean_sc::models::{Collection, CollectionEntry};
use helpers::key;
use tempfile::TempDir;

async fn file_store(dir: &TempDir) -> SqliteCollectionStore {
    let pool = init_database(&dir.path().join("glean.db")).await.unwrap();
    SqliteCollectionStore::new(pool)
}

fn collection(name: &str, ids: &[&str]) -> Collection {
    let mut collection = Collection::new(name, Some("icon.png".to_string()));
    for id in ids {
        collection.resources.push(CollectionEntry {
            key: key(id),
            alt: (*id != "b").then(|| format!("{} screen", id)),
            stored_at: Utc::now(),
        });
    }
    collection
}

#[tokio::test]
async fn test_round_trip_preserves_order_and_alt() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir).await;

    let saved = collection("Acme", &["c", "a", "b"]);
    store.set(&saved).await.unwrap();

    let loaded = store.get("acme").await.unwrap().unwrap();
    assert_eq!(loaded.display_name, "Acme");
    assert_eq!(loaded.icon_ref.as_deref(), Some("icon.png"));
    assert_eq!(
        loaded.resources.iter().map(|e| e.key.clone()).collect::<Vec<_>>(),
        vec![key("c"), key("a"), key("b")]
    );
    assert_eq!(loaded.resources[0].alt.as_deref(), Some("c screen"));
    assert_eq!(loaded.resources[2].alt, None);
}

#[tokio::test]
async fn test_missing_collection() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir).await;
    assert!(store.get("nope").await.unwrap().is_none());
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_appends_to_existing_rows() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir).await;

    store.set(&collection("Acme", &["a", "b"])).await.unwrap();
    let mut grown = store.get("acme").await.unwrap().unwrap();
    grown.resources.push(CollectionEntry {
        key: key("d"),
        alt: None,
        stored_at: Utc::now(),
    });
    store.set(&grown).await.unwrap();

    let loaded = store.get("acme").await.unwrap().unwrap();
    assert_eq!(loaded.resources.len(), 3);
    assert_eq!(loaded.resources[2].key, key("d"));
    assert_eq!(loaded.resources[0].stored_at, grown.resources[0].stored_at);
}

#[tokio::test]
async fn test_list_counts_and_orders_by_update() {
    let dir = TempDir::new().unwrap();
    let store = file_store(&dir).await;

    let mut older = collection("Older", &["a"]);
    older.updated_at = Utc::now() - Duration::hours(1);
    store.set(&older).await.unwrap();
    store.set(&collection("Newer", &["a", "b", "c"])).await.unwrap();

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, "newer");
    assert_eq!(summaries[0].resource_count, 3);
    assert_eq!(summaries[1].id, "older");
    assert_eq!(summaries[1].resource_count, 1);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = file_store(&dir).await;
        store.set(&collection("Acme", &["a", "b"])).await.unwrap();
        store.pool().close().await;
    }

    let reopened = file_store(&dir).await;
    let loaded = reopened.get("acme").await.unwrap().unwrap();
    assert_eq!(loaded.resources.len(), 2);
}
