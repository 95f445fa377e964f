//! Passive network strategy: outbound image requests

use glean_common::config::CanonicalSettings;
use std::sync::Arc;

use super::{DiscoverySink, PushStrategy, StrategyError};
use crate::models::{RawReference, SourceStrategy};
use crate::surface::{RequestFilter, ResourceType, Subscription, SurfaceHandle};

pub struct NetworkStrategy {
    filter: RequestFilter,
}

impl NetworkStrategy {
    pub fn new(settings: &CanonicalSettings) -> Self {
        let marker = settings.locator_marker.trim();
        Self {
            filter: RequestFilter {
                url_contains: (!marker.is_empty()).then(|| marker.to_string()),
                resource_type: Some(ResourceType::Image),
            },
        }
    }
}

impl PushStrategy for NetworkStrategy {
    fn source(&self) -> SourceStrategy {
        SourceStrategy::Network
    }

    fn install(
        &self,
        surface: &SurfaceHandle,
        sink: Arc<DiscoverySink>,
    ) -> Result<Subscription, StrategyError> {
        let subscription = surface.network.subscribe(
            &self.filter,
            Box::new(move |request| {
                sink.accept(RawReference::new(request.url.clone(), SourceStrategy::Network));
            }),
        )?;

        Ok(subscription)
    }
}
