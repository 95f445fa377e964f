//! Replay fixture builders

use glean_common::config::ScanConfig;
use glean_sc::models::CanonicalKey;
use glean_sc::surface::replay::{AttributeUpgrade, FixtureElement, FixtureRequest, ReplayFixture};
use glean_sc::surface::ResourceType;
use std::collections::BTreeMap;

pub const SCREEN_BASE: &str = "https://bytescale.mobbin.com/prod/content/app_screens";
const LOGO_BASE: &str = "https://bytescale.mobbin.com/prod/content/app_logos";

/// Locator of a screen as the page would render it
pub fn screen_url(id: &str) -> String {
    format!("{}/{}.png?f=webp&w=300&q=85", SCREEN_BASE, id)
}

/// Canonical key of a screen
pub fn key(id: &str) -> CanonicalKey {
    CanonicalKey::from_stored(format!("{}/{}.png", SCREEN_BASE, id))
}

/// Settings that keep sessions fast and deterministic
pub fn fast_config() -> ScanConfig {
    ScanConfig {
        settle_delay_ms: 1,
        advance_amount: 1000,
        stability_threshold: 3,
        iteration_cap: 50,
        collection_name: None,
    }
}

fn attributes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Viewport 1000, initial extent 2000, growing by 1000 per bottom hit
pub struct FixtureBuilder {
    fixture: ReplayFixture,
}

impl FixtureBuilder {
    pub fn new(location: &str) -> Self {
        Self {
            fixture: ReplayFixture {
                location: location.to_string(),
                title: String::new(),
                viewport_height: 1000,
                initial_extent: Some(2000),
                extent_step: 1000,
                max_extent: Some(3000),
                virtualize: false,
                elements: Vec::new(),
                requests: Vec::new(),
                fail_extent_after: None,
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.fixture.title = title.to_string();
        self
    }

    /// Cap the extent; `None` keeps growing forever
    pub fn max_extent(mut self, max_extent: Option<u64>) -> Self {
        self.fixture.max_extent = max_extent;
        self
    }

    pub fn virtualize(mut self) -> Self {
        self.fixture.virtualize = true;
        self
    }

    pub fn fail_extent_after(mut self, reads: u32) -> Self {
        self.fixture.fail_extent_after = Some(reads);
        self
    }

    /// Logo image in the logo category with alt `"<name> logo"`
    pub fn logo(mut self, name: &str) -> Self {
        let slug = name.to_lowercase().replace(' ', "-");
        let src = format!("{}/{}.png", LOGO_BASE, slug);
        let alt = format!("{} logo", name);
        self.fixture.elements.push(FixtureElement {
            tag: "img".to_string(),
            offset: 0,
            height: 64,
            attributes: attributes(&[("src", &src), ("alt", &alt), ("width", "64"), ("height", "64")]),
            styles: BTreeMap::new(),
            text: None,
            upgrades: Vec::new(),
        });
        self
    }

    pub fn heading(mut self, text: &str) -> Self {
        self.fixture.elements.push(FixtureElement {
            tag: "h1".to_string(),
            offset: 0,
            height: 40,
            attributes: BTreeMap::new(),
            styles: BTreeMap::new(),
            text: Some(text.to_string()),
            upgrades: Vec::new(),
        });
        self
    }

    /// Screen image carrying its locator from the first render
    pub fn screen(mut self, id: &str, offset: u64) -> Self {
        let src = screen_url(id);
        let alt = format!("{} screen", id);
        self.fixture.elements.push(FixtureElement {
            tag: "img".to_string(),
            offset,
            height: 600,
            attributes: attributes(&[("src", &src), ("alt", &alt), ("width", "300"), ("height", "600")]),
            styles: BTreeMap::new(),
            text: None,
            upgrades: Vec::new(),
        });
        self
    }

    /// Placeholder image whose `srcset` is filled in after render
    pub fn hydrated_screen(mut self, id: &str, offset: u64) -> Self {
        let srcset = format!("{} 600w", screen_url(id));
        self.fixture.elements.push(FixtureElement {
            tag: "img".to_string(),
            offset,
            height: 600,
            attributes: attributes(&[("src", "data:image/gif;base64,R0lGODlhAQABAAAAACw=")]),
            styles: BTreeMap::new(),
            text: None,
            upgrades: vec![AttributeUpgrade {
                attribute: "srcset".to_string(),
                value: srcset,
            }],
        });
        self
    }

    /// Tile painting a screen as a CSS background
    pub fn background_screen(mut self, id: &str, offset: u64) -> Self {
        let style = format!("url(\"{}\")", screen_url(id));
        self.fixture.elements.push(FixtureElement {
            tag: "div".to_string(),
            offset,
            height: 600,
            attributes: attributes(&[("style", &format!("background-image: {}", style))]),
            styles: [("background-image".to_string(), style)].into_iter().collect(),
            text: None,
            upgrades: Vec::new(),
        });
        self
    }

    /// Image request with no element behind it
    pub fn request(mut self, id: &str, offset: u64) -> Self {
        self.fixture.requests.push(FixtureRequest {
            url: screen_url(id),
            resource_type: ResourceType::Image,
            offset,
        });
        self
    }

    pub fn build(self) -> ReplayFixture {
        self.fixture
    }
}

/// Acme collection with one screen per id, 400px apart
pub fn acme_fixture(ids: &[&str]) -> ReplayFixture {
    ids.iter()
        .enumerate()
        .fold(
            FixtureBuilder::new("https://mobbin.com/apps/acme-ios/screens")
                .title("Acme iOS - Mobbin")
                .logo("Acme"),
            |builder, (index, id)| builder.screen(id, 100 + index as u64 * 400),
        )
        .build()
}
