//! Computed-style strategy: `background-image` URLs

use async_trait::async_trait;
use glean_common::config::CanonicalSettings;

use super::{PullStrategy, StrategyError};
use crate::canonical::extract_css_urls;
use crate::models::{RawReference, SourceStrategy};
use crate::surface::{DocumentModel, Selector, SurfaceError};

const BACKGROUND_IMAGE: &str = "background-image";

pub struct ComputedStyleStrategy {
    marker: String,
}

impl ComputedStyleStrategy {
    pub fn new(settings: &CanonicalSettings) -> Self {
        Self {
            marker: settings.locator_marker.clone(),
        }
    }
}

#[async_trait]
impl PullStrategy for ComputedStyleStrategy {
    fn source(&self) -> SourceStrategy {
        SourceStrategy::ComputedStyle
    }

    async fn scan(&self, document: &dyn DocumentModel) -> Result<Vec<RawReference>, StrategyError> {
        let selector = Selector::any().with_attribute_containing("style", BACKGROUND_IMAGE);
        let mut references = Vec::new();

        for element in document.query(&selector).await? {
            let value = match document.computed_style(element, BACKGROUND_IMAGE).await {
                Ok(Some(value)) => value,
                Ok(None) | Err(SurfaceError::Detached(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            references.extend(
                extract_css_urls(&value)
                    .into_iter()
                    .filter(|url| self.marker.is_empty() || url.contains(&self.marker))
                    .map(|url| RawReference::new(url, SourceStrategy::ComputedStyle)),
            );
        }

        Ok(references)
    }
}
