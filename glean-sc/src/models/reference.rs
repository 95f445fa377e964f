//! Raw and canonical resource references

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Detection strategy that produced a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    /// Element resource attribute (`src`, `srcset`)
    Attribute,
    /// Computed `background-image` style
    ComputedStyle,
    /// Attribute change observed after render
    Mutation,
    /// Outbound request observed on the network channel
    Network,
}

impl SourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SourceStrategy::Attribute => "attribute",
            SourceStrategy::ComputedStyle => "computed_style",
            SourceStrategy::Mutation => "mutation",
            SourceStrategy::Network => "network",
        }
    }
}

impl fmt::Display for SourceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared rendering hints for a reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeHint {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub alt: Option<String>,
}

impl SizeHint {
    /// Parse `width`/`height` attribute values; non-numeric values are ignored
    pub fn from_attributes(width: Option<&str>, height: Option<&str>, alt: Option<String>) -> Self {
        Self {
            width: width.and_then(parse_dimension),
            height: height.and_then(parse_dimension),
            alt: alt.filter(|a| !a.trim().is_empty()),
        }
    }
}

/// Accepts `"320"`, `"320px"` and `"320.5"`
fn parse_dimension(raw: &str) -> Option<u32> {
    let trimmed = raw.trim().trim_end_matches("px").trim();
    trimmed
        .parse::<u32>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v.max(0.0).round() as u32))
}

/// Locator as found on the surface, before canonicalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    pub locator: String,
    pub source: SourceStrategy,
    pub observed_at: DateTime<Utc>,
    pub hint: Option<SizeHint>,
}

impl RawReference {
    pub fn new(locator: impl Into<String>, source: SourceStrategy) -> Self {
        Self {
            locator: locator.into(),
            source,
            observed_at: Utc::now(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: SizeHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn alt(&self) -> Option<&str> {
        self.hint.as_ref().and_then(|h| h.alt.as_deref())
    }
}

/// Deduplication identity of a resource
///
/// Produced only by the canonicalizer; independent of query decorations
/// and resolution hints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub(crate) fn new(value: String) -> Self {
        Self(value)
    }

    /// Rehydrate a key read back from storage
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource held by the discovery store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub key: CanonicalKey,
    pub alt: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub source: SourceStrategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_hint_parsing() {
        let hint = SizeHint::from_attributes(Some("320px"), Some("180.6"), Some("  ".into()));
        assert_eq!(hint.width, Some(320));
        assert_eq!(hint.height, Some(181));
        assert_eq!(hint.alt, None);

        let hint = SizeHint::from_attributes(Some("auto"), None, Some("Login".into()));
        assert_eq!(hint.width, None);
        assert_eq!(hint.alt.as_deref(), Some("Login"));
    }
}
