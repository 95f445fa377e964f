//! glean-sc library interface
//!
//! Progressive gallery scanning: canonicalization, detection strategies, the
//! pagination loop, session coordination and the append-only merge into
//! persisted collections. Exposed for the binary and integration tests.

pub mod api;
pub mod canonical;
pub mod commands;
pub mod db;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod identity;
pub mod merge;
pub mod models;
pub mod pagination;
pub mod session;
pub mod strategies;
pub mod surface;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use glean_common::events::EventBus;
use std::sync::Arc;

use crate::db::CollectionStore;
use crate::session::ScanCoordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Owner of the single active scan session
    pub coordinator: ScanCoordinator,
    /// Collection persistence for browsing
    pub store: Arc<dyn CollectionStore>,
    /// Event bus feeding the SSE stream
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        coordinator: ScanCoordinator,
        store: Arc<dyn CollectionStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            coordinator,
            store,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::scan_routes())
        .route("/scan/events", get(api::scan_event_stream))
        .merge(api::collection_routes())
        .merge(api::health_routes())
        .with_state(state)
}
