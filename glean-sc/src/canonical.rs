//! Reference canonicalization
//!
//! Maps raw locators to a [`CanonicalKey`] so that resized, re-encoded or
//! query-decorated variants of one resource collapse into a single identity.
//! Locators outside the configured resource category are rejected.
//!
//! Canonical form: `https://<lower-case host>[:port]/<path>` with duplicate
//! and trailing slashes removed, query and fragment dropped, and the file
//! extension lower-cased.

use glean_common::config::CanonicalSettings;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::models::{CanonicalKey, RawReference, SizeHint};

/// Why a reference was filtered out
///
/// Rejections are an expected outcome of filtering, not failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("locator is not an absolute URL")]
    Malformed,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("path is outside the resource category")]
    CategoryMismatch,

    #[error("path lies in excluded category: {0}")]
    ExcludedCategory(String),

    #[error("extension not allowed: {0:?}")]
    ExtensionNotAllowed(Option<String>),

    #[error("below minimum size ({width:?}x{height:?})")]
    BelowMinimumSize {
        width: Option<u32>,
        height: Option<u32>,
    },
}

/// Pure, deterministic locator → key mapping
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    hosts: Vec<String>,
    categories: HashSet<String>,
    excluded_categories: HashSet<String>,
    extensions: HashSet<String>,
    min_dimension_px: u32,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(&CanonicalSettings::default())
    }
}

impl Canonicalizer {
    pub fn new(settings: &CanonicalSettings) -> Self {
        Self {
            hosts: settings
                .hosts
                .iter()
                .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            categories: settings.categories.iter().cloned().collect(),
            excluded_categories: settings.excluded_categories.iter().cloned().collect(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            min_dimension_px: settings.min_dimension_px,
        }
    }

    /// Canonicalize a raw reference, applying the size gate to its hint
    pub fn canonicalize(&self, raw: &RawReference) -> Result<CanonicalKey, Rejection> {
        if let Some(hint) = &raw.hint {
            self.check_size(hint)?;
        }
        self.canonicalize_locator(&raw.locator)
    }

    /// Canonicalize a bare locator (no size gate)
    pub fn canonicalize_locator(&self, locator: &str) -> Result<CanonicalKey, Rejection> {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Malformed);
        }

        // Protocol-relative locators as they appear in srcset and CSS
        let url = if let Some(rest) = trimmed.strip_prefix("//") {
            Url::parse(&format!("https://{}", rest))
        } else {
            Url::parse(trimmed)
        }
        .map_err(|_| Rejection::Malformed)?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(Rejection::UnsupportedScheme(other.to_string())),
        }

        let host = url
            .host_str()
            .ok_or(Rejection::Malformed)?
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if !self.hosts.is_empty() && !self.hosts.iter().any(|allowed| *allowed == host) {
            return Err(Rejection::HostNotAllowed(host));
        }

        // Empty segments come from duplicate and trailing slashes
        let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();

        if let Some(excluded) = segments
            .iter()
            .find(|s| self.excluded_categories.contains(**s))
        {
            return Err(Rejection::ExcludedCategory(excluded.to_string()));
        }
        if !segments.iter().any(|s| self.categories.contains(*s)) {
            return Err(Rejection::CategoryMismatch);
        }

        let (file_name, parents) = segments
            .split_last()
            .ok_or(Rejection::CategoryMismatch)?;
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_ascii_lowercase()),
            _ => return Err(Rejection::ExtensionNotAllowed(None)),
        };
        if !self.extensions.contains(&extension) {
            return Err(Rejection::ExtensionNotAllowed(Some(extension)));
        }

        let mut key = String::with_capacity(url.as_str().len());
        key.push_str("https://");
        key.push_str(&host);
        if let Some(port) = url.port() {
            key.push(':');
            key.push_str(&port.to_string());
        }
        for segment in parents {
            key.push('/');
            key.push_str(segment);
        }
        key.push('/');
        key.push_str(stem);
        key.push('.');
        key.push_str(&extension);

        Ok(CanonicalKey::new(key))
    }

    fn check_size(&self, hint: &SizeHint) -> Result<(), Rejection> {
        if self.min_dimension_px == 0 {
            return Ok(());
        }

        let too_small = |dim: Option<u32>| dim.is_some_and(|d| d < self.min_dimension_px);
        if too_small(hint.width) || too_small(hint.height) {
            return Err(Rejection::BelowMinimumSize {
                width: hint.width,
                height: hint.height,
            });
        }
        Ok(())
    }
}

/// Extract every `url(...)` value from a CSS property value
///
/// Handles single, double and missing quotes and multiple layers:
/// `url("a.png"), url(b.png)` → `["a.png", "b.png"]`.
pub fn extract_css_urls(value: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find("url(") {
        let after = &rest[start + 4..];
        let Some(end) = after.find(')') else {
            break;
        };
        let inner = after[..end]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        if !inner.is_empty() {
            urls.push(inner.to_string());
        }
        rest = &after[end + 1..];
    }

    urls
}

/// Pick the widest candidate from a `srcset` attribute
///
/// Candidates without a width descriptor rank below any described one;
/// density descriptors (`2x`) are ranked by their multiplier.
pub fn largest_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            let weight = parts
                .next()
                .and_then(|descriptor| {
                    if let Some(w) = descriptor.strip_suffix('w') {
                        w.parse::<f64>().ok()
                    } else {
                        descriptor.strip_suffix('x').and_then(|x| x.parse::<f64>().ok())
                    }
                })
                .unwrap_or(0.0);
            Some((url.to_string(), weight))
        })
        .fold(None, |best: Option<(String, f64)>, (url, weight)| match best {
            Some((_, best_weight)) if best_weight >= weight => best,
            _ => Some((url, weight)),
        })
        .map(|(url, _)| url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceStrategy;

    const BASE: &str =
        "https://bytescale.mobbin.com/FW25bBB/image/mobbin.com/prod/content/app_screens/7f3a.png";

    fn canon() -> Canonicalizer {
        Canonicalizer::default()
    }

    #[test]
    fn test_query_decorations_collapse() {
        let c = canon();
        let expected = c.canonicalize_locator(BASE).unwrap();

        for variant in [
            format!("{}?f=webp&w=1200&q=95&fit=shrink-cover", BASE),
            format!("{}?w=96&f=webp", BASE),
            format!("{}?q=95&w=96#frag", BASE),
            format!("  {}  ", BASE),
        ] {
            assert_eq!(c.canonicalize_locator(&variant).unwrap(), expected, "{}", variant);
        }
        assert_eq!(expected.as_str(), BASE);
    }

    #[test]
    fn test_cosmetic_variants_collapse() {
        let c = canon();
        let expected = c.canonicalize_locator(BASE).unwrap();

        let upper_ext = BASE.replace(".png", ".PNG");
        let http = BASE.replace("https://", "http://");
        let host_case = BASE.replace("bytescale.mobbin.com", "ByteScale.Mobbin.com");
        let double_slash = BASE.replace("/app_screens/", "//app_screens//");
        let trailing = format!("{}/", BASE);
        let protocol_relative = BASE.replace("https:", "");

        for variant in [upper_ext, http, host_case, double_slash, trailing, protocol_relative] {
            assert_eq!(c.canonicalize_locator(&variant).unwrap(), expected, "{}", variant);
        }
    }

    #[test]
    fn test_deterministic() {
        let c = canon();
        let a = c.canonicalize_locator(BASE).unwrap();
        let b = c.canonicalize_locator(BASE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_resources_stay_distinct() {
        let c = canon();
        let other = BASE.replace("7f3a", "7f3b");
        assert_ne!(
            c.canonicalize_locator(BASE).unwrap(),
            c.canonicalize_locator(&other).unwrap()
        );
    }

    #[test]
    fn test_rejections() {
        let c = canon();
        assert_eq!(c.canonicalize_locator(""), Err(Rejection::Malformed));
        assert_eq!(c.canonicalize_locator("/relative/app_screens/a.png"), Err(Rejection::Malformed));
        assert!(matches!(
            c.canonicalize_locator("data:image/png;base64,AAAA"),
            Err(Rejection::UnsupportedScheme(_))
        ));
        assert!(matches!(
            c.canonicalize_locator("https://example.com/app_screens/a.png"),
            Err(Rejection::HostNotAllowed(_))
        ));
        assert_eq!(
            c.canonicalize_locator("https://bytescale.mobbin.com/prod/content/app_logos/a.png"),
            Err(Rejection::ExcludedCategory("app_logos".to_string()))
        );
        assert_eq!(
            c.canonicalize_locator("https://bytescale.mobbin.com/prod/content/avatars/a.png"),
            Err(Rejection::CategoryMismatch)
        );
        assert_eq!(
            c.canonicalize_locator("https://bytescale.mobbin.com/app_screens/a.svg"),
            Err(Rejection::ExtensionNotAllowed(Some("svg".to_string())))
        );
        assert_eq!(
            c.canonicalize_locator("https://bytescale.mobbin.com/app_screens/readme"),
            Err(Rejection::ExtensionNotAllowed(None))
        );
    }

    #[test]
    fn test_size_gate() {
        let c = canon();
        let tiny = RawReference::new(BASE, SourceStrategy::Attribute)
            .with_hint(SizeHint::from_attributes(Some("24"), Some("24"), None));
        assert!(matches!(
            c.canonicalize(&tiny),
            Err(Rejection::BelowMinimumSize { .. })
        ));

        let large = RawReference::new(BASE, SourceStrategy::Attribute)
            .with_hint(SizeHint::from_attributes(Some("390"), Some("844"), None));
        assert!(c.canonicalize(&large).is_ok());

        // Undeclared dimensions pass the gate
        let unknown = RawReference::new(BASE, SourceStrategy::Network)
            .with_hint(SizeHint::default());
        assert!(c.canonicalize(&unknown).is_ok());
    }

    #[test]
    fn test_empty_host_list_accepts_any_host() {
        let settings = CanonicalSettings {
            hosts: Vec::new(),
            ..Default::default()
        };
        let c = Canonicalizer::new(&settings);
        assert!(c
            .canonicalize_locator("https://cdn.example.org/app_screens/a.webp")
            .is_ok());
    }

    #[test]
    fn test_extract_css_urls() {
        assert_eq!(
            extract_css_urls(r#"url("https://a/x.png"), url('b.png'), url(c.png)"#),
            vec!["https://a/x.png", "b.png", "c.png"]
        );
        assert!(extract_css_urls("none").is_empty());
        assert!(extract_css_urls("url()").is_empty());
    }

    #[test]
    fn test_largest_srcset_candidate() {
        assert_eq!(
            largest_srcset_candidate("a.png 320w, b.png 1200w, c.png 640w").as_deref(),
            Some("b.png")
        );
        assert_eq!(
            largest_srcset_candidate("a.png 1x, b.png 2x").as_deref(),
            Some("b.png")
        );
        assert_eq!(largest_srcset_candidate("only.png").as_deref(), Some("only.png"));
        assert_eq!(largest_srcset_candidate(""), None);
    }
}
