//! Stores, coordinators and event helpers

use async_trait::async_trait;
use glean_common::db::init_memory_database;
use glean_common::events::{EventBus, GleanEvent};
use glean_common::Error;
use glean_sc::db::{CollectionStore, SqliteCollectionStore};
use glean_sc::merge::MergeEngine;
use glean_sc::models::{Collection, CollectionSummary};
use glean_sc::session::ScanCoordinator;
use glean_sc::surface::SurfaceProvider;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub async fn memory_store() -> Arc<SqliteCollectionStore> {
    let pool = init_memory_database().await.unwrap();
    Arc::new(SqliteCollectionStore::new(pool))
}

/// Store whose writes can be made to fail
pub struct FlakyStore {
    inner: SqliteCollectionStore,
    failing: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        let pool = init_memory_database().await.unwrap();
        Arc::new(Self {
            inner: SqliteCollectionStore::new(pool),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CollectionStore for FlakyStore {
    async fn get(&self, id: &str) -> glean_common::Result<Option<Collection>> {
        self.inner.get(id).await
    }

    async fn set(&self, collection: &Collection) -> glean_common::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Internal("disk full".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(collection).await
    }

    async fn list(&self) -> glean_common::Result<Vec<CollectionSummary>> {
        self.inner.list().await
    }
}

/// Store whose reads take `delay`, holding sessions in the merge phase
pub struct SlowStore {
    inner: SqliteCollectionStore,
    delay: Duration,
}

impl SlowStore {
    pub async fn new(delay: Duration) -> Arc<Self> {
        let pool = init_memory_database().await.unwrap();
        Arc::new(Self {
            inner: SqliteCollectionStore::new(pool),
            delay,
        })
    }
}

#[async_trait]
impl CollectionStore for SlowStore {
    async fn get(&self, id: &str) -> glean_common::Result<Option<Collection>> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn set(&self, collection: &Collection) -> glean_common::Result<()> {
        self.inner.set(collection).await
    }

    async fn list(&self) -> glean_common::Result<Vec<CollectionSummary>> {
        self.inner.list().await
    }
}

/// Coordinator over `provider` with fast scan defaults
pub fn coordinator_for(
    provider: Arc<dyn SurfaceProvider>,
    store: Arc<dyn CollectionStore>,
    events: &EventBus,
) -> ScanCoordinator {
    ScanCoordinator::new(
        provider,
        Arc::new(MergeEngine::new(store)),
        events.clone(),
        Default::default(),
        super::fast_config(),
    )
}

/// Everything currently buffered on a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<GleanEvent>) -> Vec<GleanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll until the coordinator leaves Active/Stopping
pub async fn wait_until_finished(coordinator: &ScanCoordinator) {
    for _ in 0..500 {
        if !coordinator.status().status.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not finish");
}
