//! Full-resolution fetching and collection export
//!
//! A [`ResolutionChain`] turns a canonical key into an ordered list of
//! candidate URLs; the first candidate that downloads successfully wins.

use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::CollectionStore;
use crate::models::CanonicalKey;

/// Query of the high-quality transform variant
pub const HIGH_QUALITY_TRANSFORM: &str = "f=webp&w=1200&q=95&fit=shrink-cover";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("no candidate resolved for {0}")]
    Exhausted(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] glean_common::Error),
}

/// One way of resolving a key to a fetchable URL
pub trait Resolution: Send + Sync {
    fn name(&self) -> &str;

    fn candidate(&self, key: &CanonicalKey) -> Option<String>;
}

/// Key plus a transform query
pub struct TransformVariant {
    query: String,
}

impl TransformVariant {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl Resolution for TransformVariant {
    fn name(&self) -> &str {
        "transform"
    }

    fn candidate(&self, key: &CanonicalKey) -> Option<String> {
        Some(format!("{}?{}", key, self.query))
    }
}

/// The key itself
pub struct BareKey;

impl Resolution for BareKey {
    fn name(&self) -> &str {
        "bare"
    }

    fn candidate(&self, key: &CanonicalKey) -> Option<String> {
        Some(key.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub struct ResolutionChain {
    steps: Vec<Box<dyn Resolution>>,
}

impl Default for ResolutionChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl ResolutionChain {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// High-quality transform variant, then the bare key
    pub fn standard() -> Self {
        Self::new()
            .then(TransformVariant::new(HIGH_QUALITY_TRANSFORM))
            .then(BareKey)
    }

    pub fn then(mut self, step: impl Resolution + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Candidate URLs in resolution order, duplicates removed
    pub fn candidates(&self, key: &CanonicalKey) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for step in &self.steps {
            if let Some(url) = step.candidate(key) {
                if !candidates.contains(&url) {
                    candidates.push(url);
                }
            }
        }
        candidates
    }

    /// Download the first candidate that answers with a success status
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        key: &CanonicalKey,
    ) -> Result<FetchedResource, FetchError> {
        for url in self.candidates(key) {
            match fetch_one(client, &url).await {
                Ok(resource) => return Ok(resource),
                Err(e) => debug!(url = %url, error = %e, "Resolution candidate failed"),
            }
        }
        Err(FetchError::Exhausted(key.to_string()))
    }
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<FetchedResource, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?.to_vec();

    Ok(FetchedResource {
        url: url.to_string(),
        content_type,
        bytes,
    })
}

/// File extension for a download: content type first, then the key
pub fn extension_for(content_type: Option<&str>, key: &CanonicalKey) -> String {
    let from_type = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .map(|subtype| match subtype {
            "jpeg" => "jpg".to_string(),
            "svg+xml" => "svg".to_string(),
            other => other.to_string(),
        })
        .filter(|ext| !ext.is_empty());

    from_type
        .or_else(|| {
            key.as_str()
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .filter(|ext| !ext.contains('/'))
        })
        .unwrap_or_else(|| "png".to_string())
}

/// `<name>-screenshot-<n>.<ext>`, `n` counting from 1
pub fn export_file_name(collection_id: &str, index: usize, extension: &str) -> String {
    format!("{}-screenshot-{}.{}", collection_id, index + 1, extension)
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(CanonicalKey, String)>,
}

/// Download every resource of a collection into `out_dir`
///
/// Individual failures are collected, not fatal.
pub async fn export_collection(
    store: &dyn CollectionStore,
    client: &reqwest::Client,
    chain: &ResolutionChain,
    collection_id: &str,
    out_dir: &Path,
) -> Result<ExportReport, FetchError> {
    let collection = store
        .get(collection_id)
        .await?
        .ok_or_else(|| FetchError::CollectionNotFound(collection_id.to_string()))?;

    tokio::fs::create_dir_all(out_dir).await?;
    let mut report = ExportReport::default();

    for (index, entry) in collection.resources.iter().enumerate() {
        match chain.fetch(client, &entry.key).await {
            Ok(resource) => {
                let extension = extension_for(resource.content_type.as_deref(), &entry.key);
                let path = out_dir.join(export_file_name(&collection.id, index, &extension));
                tokio::fs::write(&path, &resource.bytes).await?;
                debug!(path = %path.display(), url = %resource.url, "Exported resource");
                report.written.push(path);
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Export failed for resource");
                report.failed.push((entry.key.clone(), e.to_string()));
            }
        }
    }

    info!(
        collection_id,
        written = report.written.len(),
        failed = report.failed.len(),
        "Collection export finished"
    );
    Ok(report)
}
