//! Scan sessions
//!
//! [`ScanCoordinator`] owns the state of the current (or last) session and
//! allows at most one to run at a time. A session runs on a spawned task:
//!
//! 1. Establish the collection identity
//! 2. Install push strategies
//! 3. Drive the pagination loop
//! 4. Tear push strategies down (exactly once, whatever the outcome)
//! 5. Final pull pass
//! 6. Merge into the collection
//! 7. Terminal transition and report
//!
//! Status transitions: `Idle → Active → {Completed, Stopped, Errored}`,
//! `Active → Stopping` on a stop request, `Stopping → Stopped` always.

use chrono::Utc;
use futures::FutureExt;
use glean_common::config::{CanonicalSettings, ScanConfig};
use glean_common::events::{EventBus, GleanEvent, ScanPhase, SessionStatus};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::canonical::Canonicalizer;
use crate::discovery::DiscoveryStore;
use crate::identity::{establish_identity, CollectionIdentity, IdentityError};
use crate::merge::{MergeEngine, MergeError};
use crate::models::{DiscoveredResource, MergeReport, ScanOutcome, SessionSnapshot};
use crate::pagination::{
    PaginationController, PaginationExit, PaginationObserver, PaginationProgress,
    StabilityPolicy, TerminationPolicy,
};
use crate::strategies::{panic_message, DiscoverySink, StrategyFailure, StrategySet};
use crate::surface::{SurfaceError, SurfaceProvider};

/// Rejected session commands
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan session is already active")]
    AlreadyActive,

    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error("no session discoveries retained for a merge retry")]
    NoRetainedSession,

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("session task aborted: {0}")]
    Aborted(String),
}

/// Conditions outside strategy execution that end a session as `Errored`
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("collection identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("surface failure: {0}")]
    Surface(#[from] SurfaceError),

    #[error("session task panicked: {0}")]
    Panicked(String),
}

pub type StrategyFactory = Arc<dyn Fn(&CanonicalSettings) -> StrategySet + Send + Sync>;
pub type PolicyFactory = Arc<dyn Fn(&ScanConfig) -> Arc<dyn TerminationPolicy> + Send + Sync>;

/// Discoveries of the last session, kept for a merge retry
#[derive(Debug, Clone)]
struct Retained {
    session_id: Uuid,
    display_name: String,
    icon_ref: Option<String>,
    discovered: Vec<DiscoveredResource>,
}

struct CoordinatorState {
    snapshot: SessionSnapshot,
    cancel: Option<CancellationToken>,
    store: Option<Arc<DiscoveryStore>>,
    identity: Option<CollectionIdentity>,
    retained: Option<Retained>,
    last_outcome: Option<ScanOutcome>,
}

type SharedState = Arc<Mutex<CoordinatorState>>;

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the single active scan session
#[derive(Clone)]
pub struct ScanCoordinator {
    state: SharedState,
    provider: Arc<dyn SurfaceProvider>,
    merge: Arc<MergeEngine>,
    events: EventBus,
    canonical: Arc<CanonicalSettings>,
    canonicalizer: Arc<Canonicalizer>,
    defaults: ScanConfig,
    strategies: StrategyFactory,
    policy: PolicyFactory,
}

impl ScanCoordinator {
    pub fn new(
        provider: Arc<dyn SurfaceProvider>,
        merge: Arc<MergeEngine>,
        events: EventBus,
        canonical: CanonicalSettings,
        defaults: ScanConfig,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                snapshot: SessionSnapshot::idle(),
                cancel: None,
                store: None,
                identity: None,
                retained: None,
                last_outcome: None,
            })),
            provider,
            merge,
            events,
            canonicalizer: Arc::new(Canonicalizer::new(&canonical)),
            canonical: Arc::new(canonical),
            defaults,
            strategies: Arc::new(StrategySet::standard),
            policy: Arc::new(|config: &ScanConfig| {
                Arc::new(StabilityPolicy::from_config(config)) as Arc<dyn TerminationPolicy>
            }),
        }
    }

    /// Replace the strategies each session runs
    pub fn with_strategies(
        mut self,
        factory: impl Fn(&CanonicalSettings) -> StrategySet + Send + Sync + 'static,
    ) -> Self {
        self.strategies = Arc::new(factory);
        self
    }

    /// Replace the termination policy each session consults
    pub fn with_policy(
        mut self,
        factory: impl Fn(&ScanConfig) -> Arc<dyn TerminationPolicy> + Send + Sync + 'static,
    ) -> Self {
        self.policy = Arc::new(factory);
        self
    }

    pub fn defaults(&self) -> &ScanConfig {
        &self.defaults
    }

    pub fn merge_engine(&self) -> &Arc<MergeEngine> {
        &self.merge
    }

    /// Start a session; `None` uses the configured defaults
    ///
    /// Rejected with [`ScanError::AlreadyActive`] while another session is
    /// active or stopping; the running session is not affected.
    pub fn start(&self, config: Option<ScanConfig>) -> Result<ScanHandle, ScanError> {
        let config = config.unwrap_or_else(|| self.defaults.clone());

        let mut state = lock(&self.state);
        if state.snapshot.status.is_running() {
            warn!(
                active_session = ?state.snapshot.session_id,
                "Rejecting scan start: a session is already active"
            );
            return Err(ScanError::AlreadyActive);
        }
        config
            .validate()
            .map_err(|e| ScanError::InvalidConfig(e.to_string()))?;

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let store = Arc::new(DiscoveryStore::new());

        state.snapshot = SessionSnapshot {
            session_id: Some(session_id),
            status: SessionStatus::Active,
            phase: Some(ScanPhase::Preparing),
            started_at: Some(Utc::now()),
            ..SessionSnapshot::idle()
        };
        state.cancel = Some(cancel.clone());
        state.store = Some(store.clone());
        state.identity = None;
        drop(state);

        info!(session_id = %session_id, "Scan session started");

        let run = SessionRun {
            coordinator: self.clone(),
            session_id,
            config,
            cancel,
            store,
        };
        let join = tokio::spawn(async move {
            // A panic while scanning still merges what was found
            let scanned = match AssertUnwindSafe(run.scan()).catch_unwind().await {
                Ok(scanned) => scanned,
                Err(payload) => run.recover(panic_message(payload.as_ref())),
            };
            match AssertUnwindSafe(run.conclude(scanned)).catch_unwind().await {
                Ok(outcome) => Ok(outcome),
                Err(_) => Err(run.coordinator.abort(session_id, run.store.len())),
            }
        });

        Ok(ScanHandle { session_id, join })
    }

    /// Request cooperative cancellation of the active session
    ///
    /// Returns `false` (and does nothing) unless a session is `Active`.
    pub fn request_stop(&self) -> bool {
        let mut state = lock(&self.state);
        if state.snapshot.status != SessionStatus::Active {
            return false;
        }

        state.snapshot.status = SessionStatus::Stopping;
        if let Some(cancel) = &state.cancel {
            cancel.cancel();
        }
        info!(session_id = ?state.snapshot.session_id, "Stop requested");
        true
    }

    /// Current snapshot; counters are live while a session runs
    pub fn status(&self) -> SessionSnapshot {
        let state = lock(&self.state);
        let mut snapshot = state.snapshot.clone();
        if let Some(store) = &state.store {
            snapshot.discovered_count = store.len();
            snapshot.stats = store.stats();
        }
        snapshot
    }

    pub fn last_outcome(&self) -> Option<ScanOutcome> {
        lock(&self.state).last_outcome.clone()
    }

    /// Merge the last session's discoveries again without rescanning
    pub async fn retry_merge(&self) -> Result<MergeReport, ScanError> {
        let retained = {
            let state = lock(&self.state);
            if state.snapshot.status.is_running() {
                return Err(ScanError::AlreadyActive);
            }
            state.retained.clone().ok_or(ScanError::NoRetainedSession)?
        };

        let report = self
            .merge
            .merge(
                &retained.display_name,
                retained.icon_ref.as_deref(),
                &retained.discovered,
            )
            .await?;

        let collection_id = {
            let mut state = lock(&self.state);
            let mut collection_id = None;
            if let Some(outcome) = state
                .last_outcome
                .as_mut()
                .filter(|o| o.session_id == retained.session_id)
            {
                outcome.merge = Some(report);
                outcome.merge_error = None;
                collection_id = outcome.collection_id.clone();
            }
            collection_id
        };

        info!(
            session_id = %retained.session_id,
            new_count = report.new_count,
            total_count = report.total_count,
            "Merge retry succeeded"
        );
        if let Some(collection_id) = collection_id {
            self.events.emit_lossy(GleanEvent::CollectionMerged {
                session_id: retained.session_id,
                collection_id,
                new_count: report.new_count,
                total_count: report.total_count,
                timestamp: Utc::now(),
            });
        }

        Ok(report)
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        apply(&mut lock(&self.state).snapshot);
    }

    fn set_phase(&self, phase: ScanPhase) {
        self.update(|snapshot| snapshot.phase = Some(phase));
    }

    /// Release the session slot after the merge step panicked
    fn abort(&self, session_id: Uuid, discovered_count: usize) -> ScanError {
        error!(session_id = %session_id, "Scan session task panicked while merging");
        let mut state = lock(&self.state);
        state.snapshot.status = SessionStatus::Errored;
        state.snapshot.phase = Some(ScanPhase::Finished);
        state.snapshot.ended_at = Some(Utc::now());
        state.snapshot.discovered_count = discovered_count;
        state.cancel = None;
        state.store = None;
        let collection_id = state.identity.as_ref().map(|i| i.collection_id.clone());
        drop(state);

        let message = "session task panicked while merging".to_string();
        self.events.emit_lossy(GleanEvent::ScanSessionFinished {
            session_id,
            status: SessionStatus::Errored,
            collection_id,
            discovered_count,
            new_count: 0,
            total_count: 0,
            error: Some(message.clone()),
            timestamp: Utc::now(),
        });
        ScanError::Aborted(message)
    }
}

/// Handle to a spawned session
pub struct ScanHandle {
    session_id: Uuid,
    join: JoinHandle<Result<ScanOutcome, ScanError>>,
}

impl ScanHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> Result<ScanOutcome, ScanError> {
        self.join
            .await
            .map_err(|e| ScanError::Aborted(e.to_string()))?
    }
}

/// Result of everything before the merge step
#[derive(Default)]
struct Scanned {
    identity: Option<CollectionIdentity>,
    exit: Option<PaginationExit>,
    iterations: u32,
    error: Option<SessionError>,
}

/// Forwards loop progress into the snapshot and onto the event bus
struct SessionObserver {
    coordinator: ScanCoordinator,
    session_id: Uuid,
    store: Arc<DiscoveryStore>,
}

impl PaginationObserver for SessionObserver {
    fn on_progress(&self, progress: &PaginationProgress) {
        let stats = self.store.stats();
        self.coordinator.update(|snapshot| {
            snapshot.iteration = progress.iteration;
            snapshot.stability_counter = progress.stability_counter;
            snapshot.progress_percent = progress.progress_percent;
            snapshot.discovered_count = progress.discovered;
            snapshot.stats = stats;
        });

        self.coordinator.events.emit_lossy(GleanEvent::ScanProgress {
            session_id: self.session_id,
            phase: ScanPhase::Scanning,
            iteration: progress.iteration,
            discovered_count: progress.discovered,
            progress_percent: progress.progress_percent,
            timestamp: Utc::now(),
        });
    }

    fn on_strategy_failure(&self, failure: &StrategyFailure) {
        self.coordinator
            .events
            .emit_lossy(strategy_failed(self.session_id, failure));
    }
}

fn strategy_failed(session_id: Uuid, failure: &StrategyFailure) -> GleanEvent {
    GleanEvent::StrategyFailed {
        session_id,
        strategy: failure.strategy.clone(),
        message: failure.message.clone(),
        timestamp: Utc::now(),
    }
}

struct SessionRun {
    coordinator: ScanCoordinator,
    session_id: Uuid,
    config: ScanConfig,
    cancel: CancellationToken,
    store: Arc<DiscoveryStore>,
}

impl SessionRun {
    /// Merge and terminal transition
    async fn conclude(&self, scanned: Scanned) -> ScanOutcome {
        let status = if self.cancel.is_cancelled() {
            SessionStatus::Stopped
        } else if scanned.error.is_some() {
            SessionStatus::Errored
        } else {
            SessionStatus::Completed
        };

        let discovered = self.store.snapshot();
        let mut merge = None;
        let mut merge_error = None;

        if let Some(identity) = &scanned.identity {
            self.coordinator.set_phase(ScanPhase::Merging);
            self.retain(identity, &discovered);

            match self
                .coordinator
                .merge
                .merge(&identity.display_name, identity.icon_ref.as_deref(), &discovered)
                .await
            {
                Ok(report) => {
                    self.coordinator.events.emit_lossy(GleanEvent::CollectionMerged {
                        session_id: self.session_id,
                        collection_id: identity.collection_id.clone(),
                        new_count: report.new_count,
                        total_count: report.total_count,
                        timestamp: Utc::now(),
                    });
                    merge = Some(report);
                }
                Err(e) => {
                    error!(session_id = %self.session_id, error = %e, "Merge failed; discoveries retained for retry");
                    merge_error = Some(e.to_string());
                }
            }
        }

        let mut outcome = ScanOutcome {
            session_id: self.session_id,
            status,
            collection_id: scanned.identity.as_ref().map(|i| i.collection_id.clone()),
            display_name: scanned.identity.as_ref().map(|i| i.display_name.clone()),
            exit: scanned.exit,
            iterations: scanned.iterations,
            stats: self.store.stats(),
            discovered,
            merge,
            error: scanned.error.as_ref().map(|e| e.to_string()),
            merge_error,
        };

        self.finish(&mut outcome);
        outcome
    }

    async fn scan(&self) -> Scanned {
        let mut scanned = Scanned::default();

        let surface = match self.coordinator.provider.open() {
            Ok(surface) => surface,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Surface unavailable");
                scanned.error = Some(e.into());
                return scanned;
            }
        };

        let identity = match establish_identity(
            surface.document.as_ref(),
            &self.coordinator.canonical,
            self.config.collection_name.as_deref(),
        )
        .await
        {
            Ok(identity) => identity,
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Collection identity not established");
                scanned.error = Some(e.into());
                return scanned;
            }
        };

        {
            let mut state = lock(&self.coordinator.state);
            state.snapshot.collection_id = Some(identity.collection_id.clone());
            state.snapshot.display_name = Some(identity.display_name.clone());
            state.identity = Some(identity.clone());
        }
        info!(
            session_id = %self.session_id,
            collection_id = %identity.collection_id,
            display_name = %identity.display_name,
            "Scanning collection"
        );
        self.coordinator.events.emit_lossy(GleanEvent::ScanSessionStarted {
            session_id: self.session_id,
            collection_id: identity.collection_id.clone(),
            display_name: identity.display_name.clone(),
            timestamp: Utc::now(),
        });
        scanned.identity = Some(identity);

        let canonicalizer = self.coordinator.canonicalizer.clone();
        let strategies = (self.coordinator.strategies)(&self.coordinator.canonical);
        let events = self.coordinator.events.clone();
        let session_id = self.session_id;
        // Push callbacks get their own sink so teardown can close it while
        // the final pull pass still folds
        let push_sink = Arc::new(
            DiscoverySink::new(canonicalizer.clone(), self.store.clone())
                .with_failure_hook(move |failure| {
                    events.emit_lossy(strategy_failed(session_id, failure))
                }),
        );
        let pull_sink = DiscoverySink::new(canonicalizer, self.store.clone());
        let observer = SessionObserver {
            coordinator: self.coordinator.clone(),
            session_id: self.session_id,
            store: self.store.clone(),
        };

        for failure in strategies.install(&surface, &push_sink) {
            observer.on_strategy_failure(&failure);
        }

        self.coordinator.set_phase(ScanPhase::Scanning);
        let policy = (self.coordinator.policy)(&self.config);
        let mut controller = PaginationController::new(
            surface.document.as_ref(),
            &strategies,
            &pull_sink,
            policy.as_ref(),
            &observer,
            &self.config,
            self.cancel.clone(),
        );
        let result = controller.run().await;
        scanned.iterations = controller.iterations();

        strategies.teardown();
        push_sink.close();

        self.coordinator.set_phase(ScanPhase::FinalPass);
        let final_pass = strategies
            .run_pull(surface.document.as_ref(), &pull_sink)
            .await;
        for failure in &final_pass.failures {
            observer.on_strategy_failure(failure);
        }

        match result {
            Ok(exit) => {
                info!(
                    session_id = %self.session_id,
                    ?exit,
                    iterations = scanned.iterations,
                    "Pagination finished"
                );
                scanned.exit = Some(exit);
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Surface failure aborted pagination");
                scanned.error = Some(e.into());
            }
        }

        scanned
    }

    /// Whatever the panicked scan established before it unwound
    fn recover(&self, message: String) -> Scanned {
        error!(session_id = %self.session_id, panic = %message, "Scan session panicked; merging partial discoveries");
        let state = lock(&self.coordinator.state);
        Scanned {
            identity: state.identity.clone(),
            exit: None,
            iterations: state.snapshot.iteration,
            error: Some(SessionError::Panicked(message)),
        }
    }

    fn retain(&self, identity: &CollectionIdentity, discovered: &[DiscoveredResource]) {
        lock(&self.coordinator.state).retained = Some(Retained {
            session_id: self.session_id,
            display_name: identity.display_name.clone(),
            icon_ref: identity.icon_ref.clone(),
            discovered: discovered.to_vec(),
        });
    }

    fn finish(&self, outcome: &mut ScanOutcome) {
        {
            let mut state = lock(&self.coordinator.state);
            // A stop accepted during the final pass or merge still wins
            if self.cancel.is_cancelled() {
                outcome.status = SessionStatus::Stopped;
            }
            let snapshot = &mut state.snapshot;
            snapshot.status = outcome.status;
            snapshot.phase = Some(ScanPhase::Finished);
            snapshot.discovered_count = outcome.discovered_count();
            snapshot.stats = outcome.stats.clone();
            snapshot.iteration = outcome.iterations;
            snapshot.ended_at = Some(Utc::now());
            if outcome.status == SessionStatus::Completed {
                snapshot.progress_percent = 100.0;
            }
            state.cancel = None;
            state.store = None;
            state.last_outcome = Some(outcome.clone());
        }

        if outcome.status == SessionStatus::Completed {
            self.coordinator.events.emit_lossy(GleanEvent::ScanProgress {
                session_id: self.session_id,
                phase: ScanPhase::Finished,
                iteration: outcome.iterations,
                discovered_count: outcome.discovered_count(),
                progress_percent: 100.0,
                timestamp: Utc::now(),
            });
        }

        info!(
            session_id = %self.session_id,
            status = ?outcome.status,
            discovered = outcome.discovered_count(),
            new_count = outcome.new_count(),
            total_count = outcome.total_count(),
            "Scan session finished"
        );
        self.coordinator.events.emit_lossy(GleanEvent::ScanSessionFinished {
            session_id: self.session_id,
            status: outcome.status,
            collection_id: outcome.collection_id.clone(),
            discovered_count: outcome.discovered_count(),
            new_count: outcome.new_count(),
            total_count: outcome.total_count(),
            error: outcome.combined_error(),
            timestamp: Utc::now(),
        });
    }
}
