//! Event types for the Glean event system
//!
//! Provides shared event definitions and the EventBus used as the progress
//! observer. Events are broadcast in-process and serialized for SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Scan session lifecycle status
///
/// `Idle → Active → {Completed, Stopped, Errored}`, with `Active → Stopping`
/// on a stop request and `Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// No session has run yet
    Idle,
    /// Pagination loop running
    Active,
    /// Stop requested, loop has not yet observed it
    Stopping,
    /// Surface exhausted or iteration cap reached
    Completed,
    /// Stopped on request
    Stopped,
    /// Aborted by a condition outside strategy execution
    Errored,
}

impl SessionStatus {
    /// Whether a session in this status blocks starting another
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Stopping)
    }
}

/// Phase reported with progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Identity extraction and strategy installation
    Preparing,
    /// Pagination loop
    Scanning,
    /// Pull pass after teardown
    FinalPass,
    /// Reconciling against the persisted collection
    Merging,
    /// Terminal state reached
    Finished,
}

/// Glean event types
///
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GleanEvent {
    /// A scan session became active
    ScanSessionStarted {
        session_id: Uuid,
        collection_id: String,
        display_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress during a scan
    ///
    /// `progress_percent` stays below 100 until the session completes.
    ScanProgress {
        session_id: Uuid,
        phase: ScanPhase,
        iteration: u32,
        discovered_count: usize,
        progress_percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// One detection strategy failed; the session continues
    StrategyFailed {
        session_id: Uuid,
        strategy: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Session discoveries were merged into a collection
    CollectionMerged {
        session_id: Uuid,
        collection_id: String,
        new_count: usize,
        total_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Session reached a terminal status
    ///
    /// `error` carries the session error or merge failure, if any.
    ScanSessionFinished {
        session_id: Uuid,
        status: SessionStatus,
        collection_id: Option<String>,
        discovered_count: usize,
        new_count: usize,
        total_count: usize,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl GleanEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            GleanEvent::ScanSessionStarted { .. } => "ScanSessionStarted",
            GleanEvent::ScanProgress { .. } => "ScanProgress",
            GleanEvent::StrategyFailed { .. } => "StrategyFailed",
            GleanEvent::CollectionMerged { .. } => "CollectionMerged",
            GleanEvent::ScanSessionFinished { .. } => "ScanSessionFinished",
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            GleanEvent::ScanSessionStarted { session_id, .. }
            | GleanEvent::ScanProgress { session_id, .. }
            | GleanEvent::StrategyFailed { session_id, .. }
            | GleanEvent::CollectionMerged { session_id, .. }
            | GleanEvent::ScanSessionFinished { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for Glean events
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GleanEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    ///
    /// # Examples
    ///
    /// ```
    /// use glean_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<GleanEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: GleanEvent,
    ) -> Result<usize, broadcast::error::SendError<GleanEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Progress reporting is fire-and-forget: a scan never waits on, or
    /// fails because of, an absent observer.
    pub fn emit_lossy(&self, event: GleanEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(session_id: Uuid) -> GleanEvent {
        GleanEvent::ScanProgress {
            session_id,
            phase: ScanPhase::Scanning,
            iteration: 2,
            discovered_count: 7,
            progress_percent: 40.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(10);
        bus.emit_lossy(progress(Uuid::new_v4()));
        assert!(bus.emit(progress(Uuid::new_v4())).is_err());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit(progress(id)).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), id);
        assert_eq!(event.event_type(), "ScanProgress");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(progress(Uuid::new_v4())).unwrap();
        assert_eq!(json["type"], "ScanProgress");
        assert_eq!(json["phase"], "scanning");
    }

    #[test]
    fn test_status_classification() {
        assert!(SessionStatus::Stopping.is_running());
        assert!(!SessionStatus::Completed.is_running());
        assert!(!SessionStatus::Idle.is_running());
        assert_eq!(
            serde_json::to_string(&SessionStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
    }
}
