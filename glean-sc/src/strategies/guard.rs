//! Callback isolation for push strategies
//!
//! A push strategy installs against a [`GuardedSurface`] rather than the raw
//! surface. Every observer it registers is wrapped so that a panic inside
//! the callback is caught and recorded against that strategy while the
//! surface keeps dispatching to the others.

use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{panic_message, record_failure, DiscoverySink, StrategyError};
use crate::surface::{
    DocumentModel, ElementHandle, MutationCallback, MutationFilter, NetworkChannel,
    RequestCallback, RequestFilter, Selector, Subscription, SurfaceHandle, SurfaceResult,
};

pub(super) struct GuardedSurface {
    inner: SurfaceHandle,
    strategy: String,
    sink: Arc<DiscoverySink>,
}

impl GuardedSurface {
    /// Surface handle whose observer callbacks are isolated
    pub(super) fn wrap(surface: &SurfaceHandle, strategy: &str, sink: &Arc<DiscoverySink>) -> SurfaceHandle {
        let guarded = Arc::new(Self {
            inner: surface.clone(),
            strategy: strategy.to_string(),
            sink: sink.clone(),
        });
        SurfaceHandle::new(guarded.clone(), guarded)
    }

    /// Runs `invoke` unless the sink is closed; a panic becomes a failure
    fn guard(strategy: &str, sink: &DiscoverySink, invoke: impl FnOnce()) {
        if !sink.is_open() {
            return;
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(invoke)) {
            let error = StrategyError::Panicked(panic_message(payload.as_ref()));
            let failure = record_failure(strategy, &error, sink);
            sink.report_failure(&failure);
        }
    }
}

#[async_trait]
impl DocumentModel for GuardedSurface {
    async fn query(&self, selector: &Selector) -> SurfaceResult<Vec<ElementHandle>> {
        self.inner.document.query(selector).await
    }

    async fn read_attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        self.inner.document.read_attribute(element, name).await
    }

    async fn computed_style(
        &self,
        element: ElementHandle,
        property: &str,
    ) -> SurfaceResult<Option<String>> {
        self.inner.document.computed_style(element, property).await
    }

    async fn text_content(&self, element: ElementHandle) -> SurfaceResult<Option<String>> {
        self.inner.document.text_content(element).await
    }

    fn observe_mutations(
        &self,
        filter: &MutationFilter,
        callback: MutationCallback,
    ) -> SurfaceResult<Subscription> {
        let strategy = self.strategy.clone();
        let sink = self.sink.clone();
        self.inner.document.observe_mutations(
            filter,
            Box::new(move |record| Self::guard(&strategy, &sink, || callback(record))),
        )
    }

    async fn scroll_by(&self, amount: u32) -> SurfaceResult<()> {
        self.inner.document.scroll_by(amount).await
    }

    async fn scroll_to(&self, offset: u64) -> SurfaceResult<()> {
        self.inner.document.scroll_to(offset).await
    }

    async fn scroll_offset(&self) -> SurfaceResult<u64> {
        self.inner.document.scroll_offset().await
    }

    async fn viewport_height(&self) -> SurfaceResult<u64> {
        self.inner.document.viewport_height().await
    }

    async fn current_extent(&self) -> SurfaceResult<u64> {
        self.inner.document.current_extent().await
    }

    async fn location(&self) -> SurfaceResult<String> {
        self.inner.document.location().await
    }

    async fn title(&self) -> SurfaceResult<String> {
        self.inner.document.title().await
    }
}

impl NetworkChannel for GuardedSurface {
    fn subscribe(
        &self,
        filter: &RequestFilter,
        callback: RequestCallback,
    ) -> SurfaceResult<Subscription> {
        let strategy = self.strategy.clone();
        let sink = self.sink.clone();
        self.inner.network.subscribe(
            filter,
            Box::new(move |request| Self::guard(&strategy, &sink, || callback(request))),
        )
    }
}
