//! Scan control handlers
//!
//! POST /scan/start, POST /scan/stop, GET /scan/status, POST /scan/merge/retry
//!
//! Every handler goes through [`ScanCoordinator::dispatch`] where a command
//! exists, so HTTP and CLI answer identically.
//!
//! [`ScanCoordinator::dispatch`]: crate::session::ScanCoordinator::dispatch

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use glean_common::config::ScanConfig;
use serde::Serialize;

use crate::commands::{Command, CommandReply, RejectionCode};
use crate::error::{ApiError, ApiResult};
use crate::models::{MergeReport, SessionSnapshot};
use crate::AppState;

/// POST /scan/merge/retry response
#[derive(Debug, Serialize)]
pub struct RetryMergeResponse {
    pub merge: MergeReport,
    pub snapshot: SessionSnapshot,
}

fn rejected(code: RejectionCode, message: String) -> ApiError {
    match code {
        RejectionCode::AlreadyActive => ApiError::Conflict(message),
        RejectionCode::InvalidConfig => ApiError::BadRequest(message),
        RejectionCode::Internal => ApiError::Internal(message),
    }
}

/// POST /scan/start
///
/// Body is an optional `ScanConfig`; an empty body uses the configured
/// defaults. Returns 202 Accepted with the session id.
pub async fn start_scan(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CommandReply>)> {
    let config = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let config: ScanConfig = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Malformed scan config: {}", e)))?;
        Some(config)
    };

    match state.coordinator.dispatch(Command::StartScan { config }) {
        CommandReply::Rejected { code, message } => Err(rejected(code, message)),
        reply => Ok((StatusCode::ACCEPTED, Json(reply))),
    }
}

/// POST /scan/stop
///
/// `accepted` is false when no session was active.
pub async fn stop_scan(State(state): State<AppState>) -> Json<CommandReply> {
    Json(state.coordinator.dispatch(Command::StopScan))
}

/// GET /scan/status
pub async fn scan_status(State(state): State<AppState>) -> Json<CommandReply> {
    Json(state.coordinator.dispatch(Command::GetStatus))
}

/// POST /scan/merge/retry
///
/// Re-merge the last session's discoveries after a failed merge.
pub async fn retry_merge(State(state): State<AppState>) -> ApiResult<Json<RetryMergeResponse>> {
    let merge = state.coordinator.retry_merge().await?;
    Ok(Json(RetryMergeResponse {
        merge,
        snapshot: state.coordinator.status(),
    }))
}

/// Build scan control routes
pub fn scan_routes() -> Router<AppState> {
    Router::new()
        .route("/scan/start", post(start_scan))
        .route("/scan/stop", post(stop_scan))
        .route("/scan/status", get(scan_status))
        .route("/scan/merge/retry", post(retry_merge))
}
