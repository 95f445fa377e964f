//! Mutation strategy: attribute changes after render
//!
//! Covers placeholders that are upgraded to the real resource once the
//! element hydrates, possibly after the element has left the viewport.

use glean_common::config::CanonicalSettings;
use std::sync::Arc;

use super::{DiscoverySink, PushStrategy, StrategyError};
use crate::canonical::{extract_css_urls, largest_srcset_candidate};
use crate::models::{RawReference, SourceStrategy};
use crate::surface::{MutationFilter, MutationRecord, Subscription, SurfaceHandle};

const WATCHED_ATTRIBUTES: [&str; 3] = ["src", "srcset", "style"];

pub struct MutationStrategy {
    marker: String,
}

impl MutationStrategy {
    pub fn new(settings: &CanonicalSettings) -> Self {
        Self {
            marker: settings.locator_marker.clone(),
        }
    }
}

/// Locators carried by a changed attribute value
fn locators_in(record: &MutationRecord) -> Vec<String> {
    let Some(value) = record.value.as_deref() else {
        return Vec::new();
    };

    match record.attribute.as_str() {
        "src" => vec![value.to_string()],
        "srcset" => largest_srcset_candidate(value).into_iter().collect(),
        "style" => extract_css_urls(value),
        _ => Vec::new(),
    }
}

impl PushStrategy for MutationStrategy {
    fn source(&self) -> SourceStrategy {
        SourceStrategy::Mutation
    }

    fn install(
        &self,
        surface: &SurfaceHandle,
        sink: Arc<DiscoverySink>,
    ) -> Result<Subscription, StrategyError> {
        let marker = self.marker.clone();
        let filter = MutationFilter::attributes(&WATCHED_ATTRIBUTES);

        let subscription = surface.document.observe_mutations(
            &filter,
            Box::new(move |record| {
                let is_logo = record
                    .hint
                    .alt
                    .as_deref()
                    .is_some_and(|alt| alt.to_lowercase().contains("logo"));
                if is_logo {
                    return;
                }

                for locator in locators_in(&record) {
                    if marker.is_empty() || locator.contains(&marker) {
                        sink.accept(
                            RawReference::new(locator, SourceStrategy::Mutation)
                                .with_hint(record.hint.clone()),
                        );
                    }
                }
            }),
        )?;

        Ok(subscription)
    }
}
