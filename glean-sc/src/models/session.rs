//! Session status snapshots and outcomes

use chrono::{DateTime, Utc};
use glean_common::events::{ScanPhase, SessionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DiscoveredResource;
use crate::discovery::DiscoveryStats;
use crate::pagination::PaginationExit;

/// Result of reconciling discoveries against a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Resources in the collection after the merge
    pub total_count: usize,
    /// Resources appended by this merge
    pub new_count: usize,
}

/// Point-in-time view of the coordinator's current or last session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    pub phase: Option<ScanPhase>,
    pub collection_id: Option<String>,
    pub display_name: Option<String>,
    pub iteration: u32,
    pub stability_counter: u32,
    pub progress_percent: f64,
    pub discovered_count: usize,
    pub stats: DiscoveryStats,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            status: SessionStatus::Idle,
            phase: None,
            collection_id: None,
            display_name: None,
            iteration: 0,
            stability_counter: 0,
            progress_percent: 0.0,
            discovered_count: 0,
            stats: DiscoveryStats::default(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// Terminal report of one session
///
/// Every terminal status carries the discovered set and, when the merge ran,
/// its counts. A failed merge is reported in `merge_error` next to the
/// terminal status, which it does not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub collection_id: Option<String>,
    pub display_name: Option<String>,
    pub exit: Option<PaginationExit>,
    pub iterations: u32,
    pub stats: DiscoveryStats,
    pub discovered: Vec<DiscoveredResource>,
    pub merge: Option<MergeReport>,
    /// Identity or surface failure that ended the session
    pub error: Option<String>,
    pub merge_error: Option<String>,
}

impl ScanOutcome {
    pub fn discovered_count(&self) -> usize {
        self.discovered.len()
    }

    pub fn new_count(&self) -> usize {
        self.merge.map(|m| m.new_count).unwrap_or(0)
    }

    pub fn total_count(&self) -> usize {
        self.merge.map(|m| m.total_count).unwrap_or(0)
    }

    /// Session and merge errors joined for reporting
    pub fn combined_error(&self) -> Option<String> {
        match (&self.error, &self.merge_error) {
            (Some(session), Some(merge)) => Some(format!("{}; merge failed: {}", session, merge)),
            (Some(session), None) => Some(session.clone()),
            (None, Some(merge)) => Some(format!("merge failed: {}", merge)),
            (None, None) => None,
        }
    }
}
