//! Attribute strategy: `img` elements carrying a resource `src`

use async_trait::async_trait;
use glean_common::config::CanonicalSettings;

use super::{PullStrategy, StrategyError};
use crate::canonical::largest_srcset_candidate;
use crate::models::{RawReference, SizeHint, SourceStrategy};
use crate::surface::{DocumentModel, ElementHandle, Selector, SurfaceError};

/// Attribute marking the collection's logo component
pub const LOGO_COMPONENT_ATTRIBUTE: &str = "data-sentry-component";
pub const LOGO_COMPONENT_VALUE: &str = "AppLogoImage";

pub struct AttributeStrategy {
    marker: String,
    excluded_categories: Vec<String>,
}

impl AttributeStrategy {
    pub fn new(settings: &CanonicalSettings) -> Self {
        Self {
            marker: settings.locator_marker.clone(),
            excluded_categories: settings.excluded_categories.clone(),
        }
    }

    fn selector(&self) -> Selector {
        if self.marker.is_empty() {
            Selector::tag("img").with_attribute("src")
        } else {
            Selector::tag("img").with_attribute_containing("src", &self.marker)
        }
    }

    fn is_logo(&self, src: &str, alt: Option<&str>, component: Option<&str>) -> bool {
        self.excluded_categories
            .iter()
            .any(|category| src.contains(category.as_str()))
            || alt.is_some_and(|a| a.to_lowercase().contains("logo"))
            || component == Some(LOGO_COMPONENT_VALUE)
    }

    async fn read_element(
        &self,
        document: &dyn DocumentModel,
        element: ElementHandle,
    ) -> Result<Vec<RawReference>, SurfaceError> {
        let Some(src) = document.read_attribute(element, "src").await? else {
            return Ok(Vec::new());
        };
        let alt = document.read_attribute(element, "alt").await?;
        let component = document
            .read_attribute(element, LOGO_COMPONENT_ATTRIBUTE)
            .await?;

        if self.is_logo(&src, alt.as_deref(), component.as_deref()) {
            return Ok(Vec::new());
        }

        let width = document.read_attribute(element, "width").await?;
        let height = document.read_attribute(element, "height").await?;
        let hint = SizeHint::from_attributes(width.as_deref(), height.as_deref(), alt);

        let mut references =
            vec![RawReference::new(src, SourceStrategy::Attribute).with_hint(hint.clone())];

        if let Some(srcset) = document.read_attribute(element, "srcset").await? {
            if let Some(candidate) = largest_srcset_candidate(&srcset) {
                references.push(RawReference::new(candidate, SourceStrategy::Attribute).with_hint(hint));
            }
        }

        Ok(references)
    }
}

#[async_trait]
impl PullStrategy for AttributeStrategy {
    fn source(&self) -> SourceStrategy {
        SourceStrategy::Attribute
    }

    async fn scan(&self, document: &dyn DocumentModel) -> Result<Vec<RawReference>, StrategyError> {
        let mut references = Vec::new();

        for element in document.query(&self.selector()).await? {
            match self.read_element(document, element).await {
                Ok(found) => references.extend(found),
                // Virtualized away between query and read
                Err(SurfaceError::Detached(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::ReplaySurface;

    #[tokio::test]
    async fn test_reads_images_and_skips_logos() {
        let surface = ReplaySurface::from_json(
            r#"{
            "location": "https://mobbin.com/apps/acme",
            "elements": [
                { "tag": "img", "attributes": {
                    "src": "https://bytescale.mobbin.com/p/app_logos/logo.png", "alt": "Acme logo" } },
                { "tag": "img", "attributes": {
                    "src": "https://bytescale.mobbin.com/p/app_screens/x.png",
                    "data-sentry-component": "AppLogoImage" } },
                { "tag": "img", "attributes": {
                    "src": "https://bytescale.mobbin.com/p/app_screens/a.png?w=96",
                    "srcset": "https://bytescale.mobbin.com/p/app_screens/a.png?w=96 96w, https://bytescale.mobbin.com/p/app_screens/a.png?w=1200 1200w",
                    "alt": "Home", "width": "390", "height": "844" } },
                { "tag": "img", "attributes": { "src": "https://other.test/app_screens/b.png" } }
            ]
        }"#,
        )
        .unwrap();

        let strategy = AttributeStrategy::new(&CanonicalSettings::default());
        let references = strategy.scan(&surface).await.unwrap();

        assert_eq!(references.len(), 2);
        assert!(references[0].locator.ends_with("a.png?w=96"));
        assert!(references[1].locator.ends_with("a.png?w=1200"));
        assert_eq!(references[0].alt(), Some("Home"));
        assert_eq!(references[0].hint.as_ref().and_then(|h| h.width), Some(390));
    }
}
