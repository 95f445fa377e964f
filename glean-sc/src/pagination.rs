//! Pagination controller
//!
//! Drives a bounded exploration of a lazily loading surface. Completion is
//! inferred from an indirect signal only: the scrollable extent stops
//! growing. The decision itself is delegated to a [`TerminationPolicy`].
//!
//! Each iteration:
//! 1. Stop if cancellation was requested
//! 2. Run the pull strategies and fold their results
//! 3. Advance the surface by `advance_amount`
//! 4. Wait `settle_delay_ms` (cancellation interrupts the wait)
//! 5. Read the extent; unchanged → stability counter + 1, changed → reset
//! 6. Report progress and consult the termination policy

use glean_common::config::ScanConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::strategies::{DiscoverySink, StrategyFailure, StrategySet};
use crate::surface::{DocumentModel, SurfaceResult};

/// Progress ceiling before the session completes
pub const MAX_RUNNING_PROGRESS: f64 = 95.0;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationExit {
    /// Extent stayed unchanged for the stability threshold
    Exhausted,
    /// Iteration cap reached
    CapReached,
    /// Stop requested
    Cancelled,
}

/// Loop state handed to the termination policy after each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    pub iteration: u32,
    pub stability_counter: u32,
    pub extent: u64,
}

/// Decides when exploration is complete
pub trait TerminationPolicy: Send + Sync {
    fn decide(&self, state: &LoopState) -> Option<PaginationExit>;
}

/// Stop after `stability_threshold` unchanged readings or `iteration_cap`
/// iterations, whichever comes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityPolicy {
    pub stability_threshold: u32,
    pub iteration_cap: u32,
}

impl StabilityPolicy {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            stability_threshold: config.stability_threshold,
            iteration_cap: config.iteration_cap,
        }
    }
}

impl TerminationPolicy for StabilityPolicy {
    fn decide(&self, state: &LoopState) -> Option<PaginationExit> {
        if state.stability_counter >= self.stability_threshold {
            Some(PaginationExit::Exhausted)
        } else if state.iteration >= self.iteration_cap {
            Some(PaginationExit::CapReached)
        } else {
            None
        }
    }
}

/// Snapshot reported after every iteration
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationProgress {
    pub iteration: u32,
    pub stability_counter: u32,
    pub progress_percent: f64,
    pub discovered: usize,
}

/// Receives progress and isolated strategy failures from the loop
pub trait PaginationObserver: Send + Sync {
    fn on_progress(&self, progress: &PaginationProgress);

    fn on_strategy_failure(&self, failure: &StrategyFailure);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl PaginationObserver for NoopObserver {
    fn on_progress(&self, _: &PaginationProgress) {}

    fn on_strategy_failure(&self, _: &StrategyFailure) {}
}

/// Scroll progress in percent, clamped to the running ceiling
pub fn progress_percent(scroll_offset: u64, extent: u64, viewport_height: u64) -> f64 {
    let scrollable = extent.saturating_sub(viewport_height);
    if scrollable == 0 {
        return MAX_RUNNING_PROGRESS;
    }
    let raw = scroll_offset as f64 / scrollable as f64 * 100.0;
    raw.clamp(0.0, MAX_RUNNING_PROGRESS)
}

pub struct PaginationController<'a> {
    document: &'a dyn DocumentModel,
    strategies: &'a StrategySet,
    sink: &'a DiscoverySink,
    policy: &'a dyn TerminationPolicy,
    observer: &'a dyn PaginationObserver,
    cancel: CancellationToken,
    advance_amount: u32,
    settle_delay: Duration,
    iteration: u32,
    stability_counter: u32,
}

impl<'a> PaginationController<'a> {
    pub fn new(
        document: &'a dyn DocumentModel,
        strategies: &'a StrategySet,
        sink: &'a DiscoverySink,
        policy: &'a dyn TerminationPolicy,
        observer: &'a dyn PaginationObserver,
        config: &ScanConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            document,
            strategies,
            sink,
            policy,
            observer,
            cancel,
            advance_amount: config.advance_amount,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            iteration: 0,
            stability_counter: 0,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iteration
    }

    pub fn stability_counter(&self) -> u32 {
        self.stability_counter
    }

    /// Run until the policy terminates, cancellation, or a surface failure
    pub async fn run(&mut self) -> SurfaceResult<PaginationExit> {
        // Start from the top and let the first batch render
        self.document.scroll_to(0).await?;
        if !self.settle().await {
            return Ok(PaginationExit::Cancelled);
        }
        let mut previous_extent = self.document.current_extent().await?;
        self.report(0.0);

        loop {
            if self.cancel.is_cancelled() {
                debug!(iteration = self.iteration, "Cancellation observed");
                return Ok(PaginationExit::Cancelled);
            }
            self.iteration += 1;

            let pull = self.strategies.run_pull(self.document, self.sink).await;
            for failure in &pull.failures {
                self.observer.on_strategy_failure(failure);
            }

            self.document.scroll_by(self.advance_amount).await?;
            if !self.settle().await {
                debug!(iteration = self.iteration, "Cancellation observed during settle");
                return Ok(PaginationExit::Cancelled);
            }

            let extent = self.document.current_extent().await?;
            if extent == previous_extent {
                self.stability_counter += 1;
            } else {
                self.stability_counter = 0;
            }
            previous_extent = extent;

            let offset = self.document.scroll_offset().await?;
            let viewport = self.document.viewport_height().await?;
            self.report(progress_percent(offset, extent, viewport));

            debug!(
                iteration = self.iteration,
                extent,
                stability_counter = self.stability_counter,
                inserted = pull.inserted,
                "Pagination iteration"
            );

            let state = LoopState {
                iteration: self.iteration,
                stability_counter: self.stability_counter,
                extent,
            };
            if let Some(exit) = self.policy.decide(&state) {
                return Ok(exit);
            }
        }
    }

    /// Wait out the settle delay; `false` when cancelled meanwhile
    async fn settle(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settle_delay) => !self.cancel.is_cancelled(),
        }
    }

    fn report(&self, progress_percent: f64) {
        self.observer.on_progress(&PaginationProgress {
            iteration: self.iteration,
            stability_counter: self.stability_counter,
            progress_percent,
            discovered: self.sink.store().len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::discovery::DiscoveryStore;
    use crate::surface::ReplaySurface;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<f64>>,
    }

    impl PaginationObserver for Recorder {
        fn on_progress(&self, progress: &PaginationProgress) {
            self.progress.lock().unwrap().push(progress.progress_percent);
        }

        fn on_strategy_failure(&self, _: &StrategyFailure) {}
    }

    fn config(threshold: u32, cap: u32) -> ScanConfig {
        ScanConfig {
            settle_delay_ms: 1,
            advance_amount: 1000,
            stability_threshold: threshold,
            iteration_cap: cap,
            collection_name: None,
        }
    }

    fn surface(max_extent: Option<u64>) -> ReplaySurface {
        let max = max_extent.map_or("null".to_string(), |m| m.to_string());
        ReplaySurface::from_json(&format!(
            r#"{{ "location": "https://mobbin.com/apps/acme", "viewport_height": 1000,
                 "initial_extent": 2000, "extent_step": 1000, "max_extent": {} }}"#,
            max
        ))
        .unwrap()
    }

    async fn run(
        surface: &ReplaySurface,
        config: &ScanConfig,
        cancel: CancellationToken,
        observer: &dyn PaginationObserver,
    ) -> (SurfaceResult<PaginationExit>, u32) {
        let strategies = StrategySet::new();
        let sink = DiscoverySink::new(
            Arc::new(Canonicalizer::default()),
            Arc::new(DiscoveryStore::new()),
        );
        let policy = StabilityPolicy::from_config(config);
        let mut controller = PaginationController::new(
            surface, &strategies, &sink, &policy, observer, config, cancel,
        );
        let exit = controller.run().await;
        (exit, controller.iterations())
    }

    #[test]
    fn test_stability_policy_prefers_exhausted() {
        let policy = StabilityPolicy {
            stability_threshold: 2,
            iteration_cap: 5,
        };
        let state = |iteration, stability_counter| LoopState {
            iteration,
            stability_counter,
            extent: 0,
        };
        assert_eq!(policy.decide(&state(1, 0)), None);
        assert_eq!(policy.decide(&state(3, 2)), Some(PaginationExit::Exhausted));
        assert_eq!(policy.decide(&state(5, 1)), Some(PaginationExit::CapReached));
        assert_eq!(policy.decide(&state(5, 2)), Some(PaginationExit::Exhausted));
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(progress_percent(0, 2000, 1000), 0.0);
        assert_eq!(progress_percent(500, 2000, 1000), 50.0);
        assert_eq!(progress_percent(1000, 2000, 1000), MAX_RUNNING_PROGRESS);
        assert_eq!(progress_percent(0, 800, 1000), MAX_RUNNING_PROGRESS);
    }

    #[tokio::test]
    async fn test_exhausts_after_growth_plus_threshold() {
        // Extent grows on iterations 1..=3, then stays at 5000
        let surface = surface(Some(5000));
        let recorder = Recorder::default();
        let (exit, iterations) =
            run(&surface, &config(3, 100), CancellationToken::new(), &recorder).await;

        assert_eq!(exit.unwrap(), PaginationExit::Exhausted);
        assert_eq!(iterations, 3 + 3);

        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.len(), 7);
        assert!(progress.iter().all(|p| *p <= MAX_RUNNING_PROGRESS));
    }

    #[tokio::test]
    async fn test_cap_bounds_unbounded_growth() {
        let surface = surface(None);
        let (exit, iterations) =
            run(&surface, &config(3, 5), CancellationToken::new(), &NoopObserver).await;

        assert_eq!(exit.unwrap(), PaginationExit::CapReached);
        assert_eq!(iterations, 5);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_no_iteration() {
        let surface = surface(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (exit, iterations) = run(&surface, &config(3, 5), cancel, &NoopObserver).await;

        assert_eq!(exit.unwrap(), PaginationExit::Cancelled);
        assert_eq!(iterations, 0);
    }

    #[tokio::test]
    async fn test_surface_failure_aborts() {
        let surface = ReplaySurface::from_json(
            r#"{ "location": "https://x", "extent_step": 100, "fail_extent_after": 2 }"#,
        )
        .unwrap();
        let (exit, iterations) =
            run(&surface, &config(3, 50), CancellationToken::new(), &NoopObserver).await;

        assert!(exit.is_err());
        assert_eq!(iterations, 2);
    }
}
