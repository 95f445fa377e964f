//! Detection strategies
//!
//! Pull strategies are run by the pagination loop against the current
//! document. Push strategies install observers on the surface and feed the
//! sink from callbacks at any time while installed.
//!
//! A strategy that errors or panics is isolated: the failure is logged,
//! counted and reported back, and the remaining strategies still run.

mod attribute;
mod computed_style;
mod guard;
mod mutation;
mod network;

pub use attribute::{AttributeStrategy, LOGO_COMPONENT_ATTRIBUTE, LOGO_COMPONENT_VALUE};
pub use computed_style::ComputedStyleStrategy;
pub use mutation::MutationStrategy;
pub use network::NetworkStrategy;

use async_trait::async_trait;
use futures::FutureExt;
use glean_common::config::CanonicalSettings;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::canonical::Canonicalizer;
use crate::discovery::DiscoveryStore;
use crate::models::{RawReference, SourceStrategy};
use crate::surface::{DocumentModel, Subscription, SurfaceError, SurfaceHandle};
use guard::GuardedSurface;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("strategy panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// One isolated strategy failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub message: String,
}

/// Strategy invoked once per pagination iteration
#[async_trait]
pub trait PullStrategy: Send + Sync {
    fn source(&self) -> SourceStrategy;

    fn name(&self) -> &str {
        self.source().name()
    }

    async fn scan(&self, document: &dyn DocumentModel) -> Result<Vec<RawReference>, StrategyError>;
}

/// Strategy that observes the surface between install and teardown
pub trait PushStrategy: Send + Sync {
    fn source(&self) -> SourceStrategy;

    fn name(&self) -> &str {
        self.source().name()
    }

    fn install(
        &self,
        surface: &SurfaceHandle,
        sink: Arc<DiscoverySink>,
    ) -> Result<Subscription, StrategyError>;
}

type FailureHook = Box<dyn Fn(&StrategyFailure) + Send + Sync>;

/// Canonicalizing entry point into a session's discovery store
///
/// Once closed, late callbacks are discarded.
pub struct DiscoverySink {
    canonicalizer: Arc<Canonicalizer>,
    store: Arc<DiscoveryStore>,
    open: AtomicBool,
    on_failure: Option<FailureHook>,
}

impl DiscoverySink {
    pub fn new(canonicalizer: Arc<Canonicalizer>, store: Arc<DiscoveryStore>) -> Self {
        Self {
            canonicalizer,
            store,
            open: AtomicBool::new(true),
            on_failure: None,
        }
    }

    /// Notified of push callback failures, which happen outside any pass
    pub fn with_failure_hook(
        mut self,
        hook: impl Fn(&StrategyFailure) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn report_failure(&self, failure: &StrategyFailure) {
        if let Some(hook) = &self.on_failure {
            hook(failure);
        }
    }

    /// Canonicalize and fold; returns `true` when the key was new
    pub fn accept(&self, raw: RawReference) -> bool {
        if !self.is_open() {
            trace!(locator = %raw.locator, "Discarding reference after teardown");
            return false;
        }

        match self.canonicalizer.canonicalize(&raw) {
            Ok(key) => self.store.insert(key, &raw),
            Err(rejection) => {
                trace!(locator = %raw.locator, source = %raw.source, %rejection, "Rejected reference");
                self.store.record_rejection();
                false
            }
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<DiscoveryStore> {
        &self.store
    }
}

/// Outcome of one pull pass
#[derive(Debug, Default)]
pub struct PullReport {
    pub inserted: usize,
    pub failures: Vec<StrategyFailure>,
}

/// The pull and push strategies of one session
pub struct StrategySet {
    pull: Vec<Box<dyn PullStrategy>>,
    push: Vec<Box<dyn PushStrategy>>,
    subscriptions: Mutex<Vec<Subscription>>,
    torn_down: AtomicBool,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategySet {
    /// Empty set
    pub fn new() -> Self {
        Self {
            pull: Vec::new(),
            push: Vec::new(),
            subscriptions: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Attribute, computed-style, mutation and network strategies
    pub fn standard(settings: &CanonicalSettings) -> Self {
        Self::new()
            .with_pull(AttributeStrategy::new(settings))
            .with_pull(ComputedStyleStrategy::new(settings))
            .with_push(MutationStrategy::new(settings))
            .with_push(NetworkStrategy::new(settings))
    }

    pub fn with_pull(mut self, strategy: impl PullStrategy + 'static) -> Self {
        self.pull.push(Box::new(strategy));
        self
    }

    pub fn with_push(mut self, strategy: impl PushStrategy + 'static) -> Self {
        self.push.push(Box::new(strategy));
        self
    }

    /// Install every push strategy; failing ones are skipped
    ///
    /// Each strategy observes through a guarded surface, so a panicking
    /// callback is recorded as a failure of that strategy only.
    pub fn install(&self, surface: &SurfaceHandle, sink: &Arc<DiscoverySink>) -> Vec<StrategyFailure> {
        let mut failures = Vec::new();
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for strategy in &self.push {
            let guarded = GuardedSurface::wrap(surface, strategy.name(), sink);
            let attempt = catch_unwind(AssertUnwindSafe(|| strategy.install(&guarded, sink.clone())));
            match flatten(attempt) {
                Ok(subscription) => {
                    debug!(strategy = strategy.name(), "Installed push strategy");
                    subscriptions.push(subscription);
                }
                Err(e) => failures.push(record_failure(strategy.name(), &e, sink)),
            }
        }

        failures
    }

    /// Run every pull strategy once and fold the results
    pub async fn run_pull(&self, document: &dyn DocumentModel, sink: &DiscoverySink) -> PullReport {
        let mut report = PullReport::default();

        for strategy in &self.pull {
            let attempt = AssertUnwindSafe(strategy.scan(document))
                .catch_unwind()
                .await;

            match flatten(attempt) {
                Ok(references) => {
                    let found = references.len();
                    let inserted = references
                        .into_iter()
                        .map(|r| sink.accept(r))
                        .filter(|new| *new)
                        .count();
                    trace!(strategy = strategy.name(), found, inserted, "Pull strategy finished");
                    report.inserted += inserted;
                }
                Err(e) => report.failures.push(record_failure(strategy.name(), &e, sink)),
            }
        }

        report
    }

    /// Remove every push observer; only the first call has an effect
    ///
    /// Returns the number of subscriptions removed.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let removed = subscriptions.iter().filter(|s| s.unsubscribe()).count();
        debug!(removed, "Push strategies torn down");
        removed
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn installed_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for StrategySet {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn flatten<T>(
    attempt: Result<Result<T, StrategyError>, Box<dyn Any + Send>>,
) -> Result<T, StrategyError> {
    match attempt {
        Ok(result) => result,
        Err(payload) => Err(StrategyError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn record_failure(strategy: &str, error: &StrategyError, sink: &DiscoverySink) -> StrategyFailure {
    warn!(strategy, error = %error, "Strategy failed, continuing with remaining strategies");
    sink.store().record_strategy_failure();
    StrategyFailure {
        strategy: strategy.to_string(),
        message: error.to_string(),
    }
}
