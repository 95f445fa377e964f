//! Recorded-surface replay
//!
//! Plays back a JSON fixture describing a lazily loading, scrollable surface:
//! elements with render offsets, attribute upgrades applied after render and
//! outbound requests. Used by the CLI and by tests to drive real sessions.
//!
//! Behaviour:
//! - an element is attached once the viewport bottom passes its offset; with
//!   `virtualize` it is detached again when scrolled above the viewport
//! - scrolling to the bottom grows the extent by `extent_step`, up to
//!   `max_extent` (unbounded when absent)
//! - each attribute upgrade is applied on the scroll after the element
//!   rendered, notifying mutation observers, before attachment is recomputed
//! - rendering an `img` (or upgrading its `src`) issues an image request

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{
    DocumentModel, ElementHandle, MutationCallback, MutationFilter, MutationRecord,
    NetworkChannel, ObservedRequest, RequestCallback, RequestFilter, ResourceType, Selector,
    Subscription, SurfaceError, SurfaceHandle, SurfaceProvider, SurfaceResult,
};
use crate::models::SizeHint;

fn default_viewport_height() -> u64 {
    900
}

fn default_element_height() -> u64 {
    200
}

fn default_resource_type() -> ResourceType {
    ResourceType::Image
}

/// Recorded surface description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFixture {
    pub location: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u64,
    /// Extent before any lazy load; defaults to two viewports
    #[serde(default)]
    pub initial_extent: Option<u64>,
    /// Growth each time the viewport reaches the bottom
    #[serde(default)]
    pub extent_step: u64,
    #[serde(default)]
    pub max_extent: Option<u64>,
    #[serde(default)]
    pub virtualize: bool,
    #[serde(default)]
    pub elements: Vec<FixtureElement>,
    #[serde(default)]
    pub requests: Vec<FixtureRequest>,
    /// Fail `current_extent` once it has been read this many times
    #[serde(default)]
    pub fail_extent_after: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureElement {
    pub tag: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_element_height")]
    pub height: u64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub upgrades: Vec<AttributeUpgrade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeUpgrade {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRequest {
    pub url: String,
    #[serde(default = "default_resource_type")]
    pub resource_type: ResourceType,
    /// Issued once the viewport bottom passes this offset
    #[serde(default)]
    pub offset: u64,
}

impl ReplayFixture {
    pub fn from_json(json: &str) -> SurfaceResult<Self> {
        serde_json::from_str(json).map_err(|e| SurfaceError::Fixture(e.to_string()))
    }

    pub fn from_file(path: &Path) -> SurfaceResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SurfaceError::Fixture(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }
}

/// Opens a fresh replay of the same fixture for every session
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    fixture: ReplayFixture,
}

impl ReplayProvider {
    pub fn new(fixture: ReplayFixture) -> Self {
        Self { fixture }
    }

    pub fn from_file(path: &Path) -> SurfaceResult<Self> {
        ReplayFixture::from_file(path).map(Self::new)
    }
}

impl SurfaceProvider for ReplayProvider {
    fn open(&self) -> SurfaceResult<SurfaceHandle> {
        Ok(SurfaceHandle::from_replay(Arc::new(ReplaySurface::new(
            self.fixture.clone(),
        ))))
    }
}

#[derive(Debug)]
struct LiveElement {
    tag: String,
    offset: u64,
    height: u64,
    attributes: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    text: Option<String>,
    pending: VecDeque<AttributeUpgrade>,
    rendered: bool,
    attached: bool,
}

impl LiveElement {
    fn hint(&self) -> SizeHint {
        SizeHint::from_attributes(
            self.attributes.get("width").map(String::as_str),
            self.attributes.get("height").map(String::as_str),
            self.attributes.get("alt").cloned(),
        )
    }

    fn image_request(&self) -> Option<ObservedRequest> {
        if !self.tag.eq_ignore_ascii_case("img") {
            return None;
        }
        self.attributes.get("src").map(|src| ObservedRequest {
            url: src.clone(),
            resource_type: ResourceType::Image,
        })
    }
}

#[derive(Debug)]
struct State {
    offset: u64,
    extent: u64,
    extent_reads: u32,
    elements: Vec<LiveElement>,
    requests: Vec<(FixtureRequest, bool)>,
}

enum Notice {
    Mutation(MutationRecord),
    Request(ObservedRequest),
}

type SharedMutationCallback = Arc<dyn Fn(MutationRecord) + Send + Sync>;
type SharedRequestCallback = Arc<dyn Fn(&ObservedRequest) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    mutation: Vec<(u64, MutationFilter, SharedMutationCallback)>,
    network: Vec<(u64, RequestFilter, SharedRequestCallback)>,
}

/// Replay implementation of [`DocumentModel`] and [`NetworkChannel`]
pub struct ReplaySurface {
    location: String,
    title: String,
    viewport_height: u64,
    extent_step: u64,
    max_extent: Option<u64>,
    virtualize: bool,
    fail_extent_after: Option<u32>,
    state: Mutex<State>,
    observers: Arc<Mutex<Observers>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReplaySurface {
    pub fn new(fixture: ReplayFixture) -> Self {
        let initial_extent = fixture
            .initial_extent
            .unwrap_or(fixture.viewport_height * 2)
            .max(fixture.viewport_height);

        let elements = fixture
            .elements
            .into_iter()
            .map(|e| LiveElement {
                tag: e.tag.to_ascii_lowercase(),
                offset: e.offset,
                height: e.height,
                attributes: e.attributes,
                styles: e.styles,
                text: e.text,
                pending: e.upgrades.into(),
                rendered: false,
                attached: false,
            })
            .collect();

        let surface = Self {
            location: fixture.location,
            title: fixture.title,
            viewport_height: fixture.viewport_height,
            extent_step: fixture.extent_step,
            max_extent: fixture.max_extent,
            virtualize: fixture.virtualize,
            fail_extent_after: fixture.fail_extent_after,
            state: Mutex::new(State {
                offset: 0,
                extent: initial_extent,
                extent_reads: 0,
                elements,
                requests: fixture.requests.into_iter().map(|r| (r, false)).collect(),
            }),
            observers: Arc::new(Mutex::new(Observers::default())),
        };

        // Initial render happens before anyone observes
        let mut state = lock(&surface.state);
        surface.recompute_attachment(&mut state, &mut Vec::new());
        drop(state);

        surface
    }

    pub fn from_json(json: &str) -> SurfaceResult<Self> {
        ReplayFixture::from_json(json).map(Self::new)
    }

    pub fn from_file(path: &Path) -> SurfaceResult<Self> {
        ReplayFixture::from_file(path).map(Self::new)
    }

    /// Installed (mutation, network) observer counts
    pub fn observer_counts(&self) -> (usize, usize) {
        let observers = lock(&self.observers);
        (observers.mutation.len(), observers.network.len())
    }

    /// Issue an out-of-band request, as a background fetch would
    pub fn emit_request(&self, request: ObservedRequest) {
        self.dispatch(vec![Notice::Request(request)]);
    }

    fn move_to(&self, target: u64) {
        let mut notices = Vec::new();
        {
            let mut state = lock(&self.state);
            let max_offset = state.extent.saturating_sub(self.viewport_height);
            state.offset = target.min(max_offset);

            if state.offset + self.viewport_height >= state.extent && self.extent_step > 0 {
                let grown = state.extent + self.extent_step;
                state.extent = match self.max_extent {
                    Some(max) => grown.min(max.max(state.extent)),
                    None => grown,
                };
            }

            self.apply_upgrades(&mut state, &mut notices);
            self.recompute_attachment(&mut state, &mut notices);
            debug!(offset = state.offset, extent = state.extent, "Replay surface scrolled");
        }
        self.dispatch(notices);
    }

    fn apply_upgrades(&self, state: &mut State, notices: &mut Vec<Notice>) {
        for (index, element) in state.elements.iter_mut().enumerate() {
            if !element.attached {
                continue;
            }
            let Some(upgrade) = element.pending.pop_front() else {
                continue;
            };

            element
                .attributes
                .insert(upgrade.attribute.clone(), upgrade.value.clone());
            notices.push(Notice::Mutation(MutationRecord {
                element: ElementHandle::new(index as u64 + 1),
                tag: element.tag.clone(),
                attribute: upgrade.attribute.clone(),
                value: Some(upgrade.value),
                hint: element.hint(),
            }));
            if upgrade.attribute == "src" {
                notices.extend(element.image_request().map(Notice::Request));
            }
        }
    }

    fn recompute_attachment(&self, state: &mut State, notices: &mut Vec<Notice>) {
        let bottom = state.offset + self.viewport_height;
        let top = state.offset;
        let extent = state.extent;

        for element in state.elements.iter_mut() {
            let visible = element.offset < bottom && element.offset < extent;
            let attached = visible && (!self.virtualize || element.offset + element.height > top);
            if attached && !element.rendered {
                element.rendered = true;
                notices.extend(element.image_request().map(Notice::Request));
            }
            element.attached = attached;
        }

        for (request, fired) in state.requests.iter_mut() {
            if !*fired && request.offset < bottom {
                *fired = true;
                notices.push(Notice::Request(ObservedRequest {
                    url: request.url.clone(),
                    resource_type: request.resource_type,
                }));
            }
        }
    }

    /// Deliver notices outside the state lock
    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }

        let (mutation, network) = {
            let observers = lock(&self.observers);
            (observers.mutation.clone(), observers.network.clone())
        };

        for notice in notices {
            match notice {
                Notice::Mutation(record) => {
                    for (_, filter, callback) in &mutation {
                        if filter.accepts(&record.attribute) {
                            callback(record.clone());
                        }
                    }
                }
                Notice::Request(request) => {
                    for (_, filter, callback) in &network {
                        if filter.accepts(&request) {
                            callback(&request);
                        }
                    }
                }
            }
        }
    }

    fn with_element<T>(
        &self,
        element: ElementHandle,
        read: impl FnOnce(&LiveElement) -> T,
    ) -> SurfaceResult<T> {
        let state = lock(&self.state);
        let index = element.id().checked_sub(1).map(|i| i as usize);
        match index.and_then(|i| state.elements.get(i)) {
            Some(live) if live.attached => Ok(read(live)),
            _ => Err(SurfaceError::Detached(element)),
        }
    }
}

#[async_trait]
impl DocumentModel for ReplaySurface {
    async fn query(&self, selector: &Selector) -> SurfaceResult<Vec<ElementHandle>> {
        let state = lock(&self.state);
        Ok(state
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.attached)
            .filter(|(_, e)| selector.matches(&e.tag, |name| e.attributes.get(name).map(String::as_str)))
            .map(|(index, _)| ElementHandle::new(index as u64 + 1))
            .collect())
    }

    async fn read_attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> SurfaceResult<Option<String>> {
        self.with_element(element, |e| e.attributes.get(name).cloned())
    }

    async fn computed_style(
        &self,
        element: ElementHandle,
        property: &str,
    ) -> SurfaceResult<Option<String>> {
        self.with_element(element, |e| e.styles.get(property).cloned())
    }

    async fn text_content(&self, element: ElementHandle) -> SurfaceResult<Option<String>> {
        self.with_element(element, |e| e.text.clone())
    }

    fn observe_mutations(
        &self,
        filter: &MutationFilter,
        callback: MutationCallback,
    ) -> SurfaceResult<Subscription> {
        let mut observers = lock(&self.observers);
        observers.next_id += 1;
        let id = observers.next_id;
        observers
            .mutation
            .push((id, filter.clone(), Arc::from(callback)));

        let registry = Arc::downgrade(&self.observers);
        Ok(Subscription::new("replay-mutation", move || {
            if let Some(registry) = registry.upgrade() {
                lock(&*registry).mutation.retain(|(entry, _, _)| *entry != id);
            }
        }))
    }

    async fn scroll_by(&self, amount: u32) -> SurfaceResult<()> {
        let current = lock(&self.state).offset;
        self.move_to(current + u64::from(amount));
        Ok(())
    }

    async fn scroll_to(&self, offset: u64) -> SurfaceResult<()> {
        self.move_to(offset);
        Ok(())
    }

    async fn scroll_offset(&self) -> SurfaceResult<u64> {
        Ok(lock(&self.state).offset)
    }

    async fn viewport_height(&self) -> SurfaceResult<u64> {
        Ok(self.viewport_height)
    }

    async fn current_extent(&self) -> SurfaceResult<u64> {
        let mut state = lock(&self.state);
        state.extent_reads += 1;
        if let Some(limit) = self.fail_extent_after {
            if state.extent_reads > limit {
                return Err(SurfaceError::operation(
                    "current_extent",
                    "surface stopped responding",
                ));
            }
        }
        Ok(state.extent)
    }

    async fn location(&self) -> SurfaceResult<String> {
        Ok(self.location.clone())
    }

    async fn title(&self) -> SurfaceResult<String> {
        Ok(self.title.clone())
    }
}

impl NetworkChannel for ReplaySurface {
    fn subscribe(
        &self,
        filter: &RequestFilter,
        callback: RequestCallback,
    ) -> SurfaceResult<Subscription> {
        let mut observers = lock(&self.observers);
        observers.next_id += 1;
        let id = observers.next_id;
        observers
            .network
            .push((id, filter.clone(), Arc::from(callback)));

        let registry = Arc::downgrade(&self.observers);
        Ok(Subscription::new("replay-network", move || {
            if let Some(registry) = registry.upgrade() {
                lock(&*registry).network.retain(|(entry, _, _)| *entry != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIXTURE: &str = r#"{
        "location": "https://mobbin.com/apps/acme/screens",
        "title": "Acme - Mobbin",
        "viewport_height": 1000,
        "initial_extent": 2000,
        "extent_step": 1000,
        "max_extent": 3000,
        "virtualize": true,
        "elements": [
            { "tag": "h1", "text": "Acme" },
            { "tag": "img", "offset": 500, "attributes": { "src": "placeholder.gif" },
              "upgrades": [ { "attribute": "src", "value": "real.png" } ] },
            { "tag": "img", "offset": 1500, "attributes": { "src": "later.png" } }
        ],
        "requests": [ { "url": "prefetch.png", "offset": 1800 } ]
    }"#;

    #[tokio::test]
    async fn test_initial_render_and_growth() {
        let surface = ReplaySurface::from_json(FIXTURE).unwrap();

        let images = surface.query(&Selector::tag("img")).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(surface.current_extent().await.unwrap(), 2000);

        surface.scroll_by(1000).await.unwrap();
        assert_eq!(surface.scroll_offset().await.unwrap(), 1000);
        assert_eq!(surface.current_extent().await.unwrap(), 3000);

        // Growth stops at max_extent
        surface.scroll_by(1000).await.unwrap();
        surface.scroll_by(1000).await.unwrap();
        assert_eq!(surface.current_extent().await.unwrap(), 3000);
        assert_eq!(surface.scroll_offset().await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_upgrade_notifies_then_virtualizes_away() {
        let surface = ReplaySurface::from_json(FIXTURE).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = surface
            .observe_mutations(
                &MutationFilter::attributes(&["src"]),
                Box::new(move |record| lock(&*sink).push(record.value)),
            )
            .unwrap();

        surface.scroll_by(1000).await.unwrap();

        assert_eq!(*lock(&*seen), vec![Some("real.png".to_string())]);
        // Element at 500 (height 200) is above the viewport now
        let srcs = surface
            .query(&Selector::tag("img").with_attribute_containing("src", "real"))
            .await
            .unwrap();
        assert!(srcs.is_empty());
    }

    #[tokio::test]
    async fn test_requests_and_unsubscribe() {
        let surface = ReplaySurface::from_json(FIXTURE).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = surface
            .subscribe(
                &RequestFilter {
                    url_contains: Some(".png".into()),
                    resource_type: Some(ResourceType::Image),
                },
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(surface.observer_counts(), (0, 1));

        // real.png (upgrade), later.png (render), prefetch.png
        surface.scroll_by(1000).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        subscription.unsubscribe();
        assert_eq!(surface.observer_counts(), (0, 0));
        surface.emit_request(ObservedRequest {
            url: "late.png".into(),
            resource_type: ResourceType::Image,
        });
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_detached_element_reads_fail() {
        let surface = ReplaySurface::from_json(FIXTURE).unwrap();
        let handle = surface.query(&Selector::tag("img")).await.unwrap()[0];
        surface.scroll_by(1000).await.unwrap();

        assert!(matches!(
            surface.read_attribute(handle, "src").await,
            Err(SurfaceError::Detached(_))
        ));
    }

    #[tokio::test]
    async fn test_extent_failure_injection() {
        let surface = ReplaySurface::new(ReplayFixture {
            fail_extent_after: Some(1),
            ..ReplayFixture::from_json(r#"{ "location": "https://x" }"#).unwrap()
        });
        assert!(surface.current_extent().await.is_ok());
        assert!(surface.current_extent().await.is_err());
    }
}
