//! Content surface boundary
//!
//! The scanner never touches a real rendering engine. It talks to a
//! [`DocumentModel`] (structured queries, scrolling and mutation observation)
//! and a [`NetworkChannel`] (outbound request observation). `replay`
//! provides a recorded-surface implementation of both.

pub mod replay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::models::SizeHint;

pub use replay::{ReplayFixture, ReplayProvider, ReplaySurface};

/// Surface operation failure
#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    #[error("element {0} is no longer attached")]
    Detached(ElementHandle),

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },

    #[error("fixture error: {0}")]
    Fixture(String),
}

impl SurfaceError {
    pub fn operation(operation: &str, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

/// Opaque reference to an element of the document model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an attribute value must match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeMatch {
    Present,
    Equals(String),
    Contains(String),
    ContainsIgnoreCase(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeCondition {
    pub name: String,
    pub matcher: AttributeMatch,
}

/// Structured element selector (tag plus attribute conditions)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub tag: Option<String>,
    pub conditions: Vec<AttributeCondition>,
}

impl Selector {
    /// Any element
    pub fn any() -> Self {
        Self::default()
    }

    pub fn tag(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_ascii_lowercase()),
            conditions: Vec::new(),
        }
    }

    fn with(mut self, name: &str, matcher: AttributeMatch) -> Self {
        self.conditions.push(AttributeCondition {
            name: name.to_string(),
            matcher,
        });
        self
    }

    pub fn with_attribute(self, name: &str) -> Self {
        self.with(name, AttributeMatch::Present)
    }

    pub fn with_attribute_equal(self, name: &str, value: &str) -> Self {
        self.with(name, AttributeMatch::Equals(value.to_string()))
    }

    pub fn with_attribute_containing(self, name: &str, needle: &str) -> Self {
        self.with(name, AttributeMatch::Contains(needle.to_string()))
    }

    pub fn with_attribute_containing_ignore_case(self, name: &str, needle: &str) -> Self {
        self.with(name, AttributeMatch::ContainsIgnoreCase(needle.to_string()))
    }

    /// Evaluate against an element's tag and attribute lookup
    pub fn matches<'a>(&self, tag: &str, attribute: impl Fn(&str) -> Option<&'a str>) -> bool {
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        self.conditions.iter().all(|condition| {
            let Some(value) = attribute(&condition.name) else {
                return false;
            };
            match &condition.matcher {
                AttributeMatch::Present => true,
                AttributeMatch::Equals(expected) => value == expected.as_str(),
                AttributeMatch::Contains(needle) => value.contains(needle.as_str()),
                AttributeMatch::ContainsIgnoreCase(needle) => value
                    .to_lowercase()
                    .contains(&needle.to_lowercase()),
            }
        })
    }

    /// CSS rendering, for logging and for adaptors backed by a real DOM
    pub fn to_css(&self) -> String {
        let mut css = self.tag.clone().unwrap_or_else(|| "*".to_string());
        for condition in &self.conditions {
            let fragment = match &condition.matcher {
                AttributeMatch::Present => format!("[{}]", condition.name),
                AttributeMatch::Equals(v) => format!("[{}=\"{}\"]", condition.name, v),
                AttributeMatch::Contains(v) => format!("[{}*=\"{}\"]", condition.name, v),
                AttributeMatch::ContainsIgnoreCase(v) => {
                    format!("[{}*=\"{}\" i]", condition.name, v)
                }
            };
            css.push_str(&fragment);
        }
        css
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

/// Attribute names a mutation observer is interested in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFilter {
    pub attributes: Vec<String>,
}

impl MutationFilter {
    pub fn attributes(names: &[&str]) -> Self {
        Self {
            attributes: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn accepts(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

/// One observed attribute change
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub element: ElementHandle,
    pub tag: String,
    pub attribute: String,
    pub value: Option<String>,
    /// Declared size and alt of the element at the time of the change
    pub hint: SizeHint,
}

/// Kind of resource an outbound request loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Script,
    Stylesheet,
    Document,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub url_contains: Option<String>,
    pub resource_type: Option<ResourceType>,
}

impl RequestFilter {
    pub fn accepts(&self, request: &ObservedRequest) -> bool {
        let url_ok = self
            .url_contains
            .as_deref()
            .map_or(true, |needle| request.url.contains(needle));
        let type_ok = self
            .resource_type
            .map_or(true, |kind| request.resource_type == kind);
        url_ok && type_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub url: String,
    pub resource_type: ResourceType,
}

pub type MutationCallback = Box<dyn Fn(MutationRecord) + Send + Sync>;
pub type RequestCallback = Box<dyn Fn(&ObservedRequest) + Send + Sync>;

type Teardown = Box<dyn FnOnce() + Send + Sync>;

/// Handle to an installed observer
///
/// Unsubscribing is idempotent and also happens on drop.
pub struct Subscription {
    label: String,
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    pub fn new(label: impl Into<String>, teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            label: label.into(),
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Remove the observer; returns `false` when already removed
    pub fn unsubscribe(&self) -> bool {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match teardown {
            Some(teardown) => {
                teardown();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Structured view of the content surface
#[async_trait]
pub trait DocumentModel: Send + Sync {
    async fn query(&self, selector: &Selector) -> SurfaceResult<Vec<ElementHandle>>;

    async fn read_attribute(&self, element: ElementHandle, name: &str)
        -> SurfaceResult<Option<String>>;

    async fn computed_style(&self, element: ElementHandle, property: &str)
        -> SurfaceResult<Option<String>>;

    async fn text_content(&self, element: ElementHandle) -> SurfaceResult<Option<String>>;

    /// Invoke `callback` synchronously for every matching attribute change
    fn observe_mutations(
        &self,
        filter: &MutationFilter,
        callback: MutationCallback,
    ) -> SurfaceResult<Subscription>;

    async fn scroll_by(&self, amount: u32) -> SurfaceResult<()>;

    async fn scroll_to(&self, offset: u64) -> SurfaceResult<()>;

    async fn scroll_offset(&self) -> SurfaceResult<u64>;

    async fn viewport_height(&self) -> SurfaceResult<u64>;

    /// Total scrollable height; grows as lazy content loads
    async fn current_extent(&self) -> SurfaceResult<u64>;

    async fn location(&self) -> SurfaceResult<String>;

    async fn title(&self) -> SurfaceResult<String>;
}

/// Passive observer of the surface's outbound requests
pub trait NetworkChannel: Send + Sync {
    fn subscribe(&self, filter: &RequestFilter, callback: RequestCallback)
        -> SurfaceResult<Subscription>;
}

/// Document model and network channel of one surface
#[derive(Clone)]
pub struct SurfaceHandle {
    pub document: Arc<dyn DocumentModel>,
    pub network: Arc<dyn NetworkChannel>,
}

impl SurfaceHandle {
    pub fn new(document: Arc<dyn DocumentModel>, network: Arc<dyn NetworkChannel>) -> Self {
        Self { document, network }
    }

    pub fn from_replay(surface: Arc<ReplaySurface>) -> Self {
        Self {
            document: surface.clone(),
            network: surface,
        }
    }
}

/// Supplies the surface a new session scans
pub trait SurfaceProvider: Send + Sync {
    fn open(&self) -> SurfaceResult<SurfaceHandle>;
}

/// A fixed surface shared by every session
impl SurfaceProvider for SurfaceHandle {
    fn open(&self) -> SurfaceResult<SurfaceHandle> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_selector_matching() {
        let attrs: HashMap<&str, &str> =
            [("src", "https://cdn/x.png"), ("alt", "Acme Logo")].into_iter().collect();
        let lookup = |name: &str| attrs.get(name).copied();

        assert!(Selector::tag("img").with_attribute_containing("src", "cdn").matches("IMG", lookup));
        assert!(Selector::tag("img")
            .with_attribute_containing_ignore_case("alt", "logo")
            .matches("img", lookup));
        assert!(!Selector::tag("div").matches("img", lookup));
        assert!(!Selector::any().with_attribute("style").matches("img", lookup));
    }

    #[test]
    fn test_selector_css() {
        let selector = Selector::tag("img")
            .with_attribute_containing("src", "cdn")
            .with_attribute_equal("data-kind", "logo");
        assert_eq!(selector.to_css(), r#"img[src*="cdn"][data-kind="logo"]"#);
        assert_eq!(Selector::any().with_attribute("style").to_css(), "*[style]");
    }

    #[test]
    fn test_request_filter() {
        let filter = RequestFilter {
            url_contains: Some("cdn".into()),
            resource_type: Some(ResourceType::Image),
        };
        let image = ObservedRequest {
            url: "https://cdn/a.png".into(),
            resource_type: ResourceType::Image,
        };
        let script = ObservedRequest {
            url: "https://cdn/a.js".into(),
            resource_type: ResourceType::Script,
        };
        assert!(filter.accepts(&image));
        assert!(!filter.accepts(&script));
    }

    #[test]
    fn test_subscription_unsubscribes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscription.is_active());
        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(Subscription::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
