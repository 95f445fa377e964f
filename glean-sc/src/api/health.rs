//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use glean_common::events::SessionStatus;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Status of the current or last scan session
    pub session_status: SessionStatus,
    pub event_subscribers: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "glean-sc".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        session_status: state.coordinator.status().status,
        event_subscribers: state.event_bus.subscriber_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
