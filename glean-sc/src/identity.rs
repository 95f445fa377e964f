//! Collection identity extraction
//!
//! Works out which collection a surface belongs to before scanning starts.
//! Name sources, first usable one wins:
//! 1. Explicit override from the scan config
//! 2. Logo image alt text with the words "logo" and "app" removed
//! 3. First `h1`/`h2` heading (headings whose class mentions "app" first)
//! 4. `/apps/<slug>` in the location, dashes to spaces, title-cased
//! 5. Page title up to the first `-`
//!
//! The icon is the logo image's `src` when it lies in a logo category.

use glean_common::config::CanonicalSettings;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::collection_id_for;
use crate::strategies::{LOGO_COMPONENT_ATTRIBUTE, LOGO_COMPONENT_VALUE};
use crate::surface::{DocumentModel, Selector, SurfaceError};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("surface error while reading identity: {0}")]
    Surface(#[from] SurfaceError),

    #[error("no collection name could be established")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Override,
    LogoAlt,
    Heading,
    Location,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIdentity {
    pub collection_id: String,
    pub display_name: String,
    pub icon_ref: Option<String>,
    pub source: IdentitySource,
}

struct Logo {
    src: Option<String>,
    alt: Option<String>,
}

pub async fn establish_identity(
    document: &dyn DocumentModel,
    settings: &CanonicalSettings,
    name_override: Option<&str>,
) -> Result<CollectionIdentity, IdentityError> {
    let logo = find_logo(document, settings).await?;
    let icon_ref = logo.as_ref().and_then(|l| l.src.clone()).filter(|src| {
        settings
            .excluded_categories
            .iter()
            .any(|category| src.contains(category.as_str()))
    });

    let mut candidates: Vec<(IdentitySource, Option<String>)> = vec![(
        IdentitySource::Override,
        name_override.map(|n| n.trim().to_string()),
    )];
    if icon_ref.is_some() {
        let alt = logo.and_then(|l| l.alt).map(|alt| strip_logo_words(&alt));
        candidates.push((IdentitySource::LogoAlt, alt));
    }

    for (source, candidate) in candidates {
        if let Some(name) = usable(candidate) {
            return Ok(identity(name, icon_ref, source));
        }
    }

    if let Some(name) = usable(heading_text(document).await?) {
        return Ok(identity(name, icon_ref, IdentitySource::Heading));
    }

    let location = document.location().await?;
    if let Some(name) = usable(name_from_location(&location)) {
        return Ok(identity(name, icon_ref, IdentitySource::Location));
    }

    let title = document.title().await?;
    if let Some(name) = usable(title.split('-').next().map(str::to_string)) {
        return Ok(identity(name, icon_ref, IdentitySource::Title));
    }

    Err(IdentityError::NotFound)
}

fn identity(display_name: String, icon_ref: Option<String>, source: IdentitySource) -> CollectionIdentity {
    debug!(name = %display_name, ?source, "Collection identity established");
    CollectionIdentity {
        collection_id: collection_id_for(&display_name),
        display_name,
        icon_ref,
        source,
    }
}

/// A name is usable when it yields a non-empty collection id
fn usable(candidate: Option<String>) -> Option<String> {
    candidate
        .map(|name| name.trim().to_string())
        .filter(|name| !collection_id_for(name).is_empty())
}

async fn find_logo(
    document: &dyn DocumentModel,
    settings: &CanonicalSettings,
) -> Result<Option<Logo>, SurfaceError> {
    let mut selectors: Vec<Selector> = settings
        .excluded_categories
        .iter()
        .map(|category| {
            Selector::tag("img")
                .with_attribute_containing("src", category)
                .with_attribute_containing_ignore_case("alt", "logo")
        })
        .collect();
    selectors.push(Selector::tag("img").with_attribute_equal(LOGO_COMPONENT_ATTRIBUTE, LOGO_COMPONENT_VALUE));
    selectors.push(Selector::tag("img").with_attribute_containing_ignore_case("alt", "logo"));

    for selector in &selectors {
        if let Some(element) = document.query(selector).await?.into_iter().next() {
            return Ok(Some(Logo {
                src: document.read_attribute(element, "src").await?,
                alt: document.read_attribute(element, "alt").await?,
            }));
        }
    }

    Ok(None)
}

async fn heading_text(document: &dyn DocumentModel) -> Result<Option<String>, SurfaceError> {
    let selectors = [
        Selector::tag("h1").with_attribute_containing_ignore_case("class", "app"),
        Selector::tag("h2").with_attribute_containing_ignore_case("class", "app"),
        Selector::tag("h1"),
        Selector::tag("h2"),
    ];

    for selector in &selectors {
        if let Some(element) = document.query(selector).await?.into_iter().next() {
            return document.text_content(element).await;
        }
    }

    Ok(None)
}

/// Drop the words "logo" and "app" (any case) from a logo alt text
pub fn strip_logo_words(alt: &str) -> String {
    alt.split_whitespace()
        .filter(|word| {
            let lower = word.to_lowercase();
            lower != "logo" && lower != "app"
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `https://host/apps/acme-bank/screens` → `Acme Bank`
pub fn name_from_location(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    let mut segments = url.path_segments()?;
    segments.find(|segment| *segment == "apps")?;
    let slug = segments.next().filter(|s| !s.is_empty())?;

    let decoded = percent_decode_str(slug).decode_utf8().ok()?;

    Some(title_case(&decoded.replace('-', " ")))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
