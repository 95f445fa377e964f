//! Session-scoped discovery store
//!
//! Holds the canonical resources found during one scan session. Keys are
//! unique and discovery order is preserved. Push strategies fold into the
//! store from synchronous callbacks while the pagination loop folds pull
//! results, so the index sits behind a mutex and every fold is atomic.
//! Folding is commutative and idempotent with respect to the key set.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{CanonicalKey, DiscoveredResource, RawReference, SourceStrategy};

/// Inserted resources per detection strategy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCounts {
    pub attribute: u64,
    pub computed_style: u64,
    pub mutation: u64,
    pub network: u64,
}

impl StrategyCounts {
    fn bump(&mut self, source: SourceStrategy) {
        match source {
            SourceStrategy::Attribute => self.attribute += 1,
            SourceStrategy::ComputedStyle => self.computed_style += 1,
            SourceStrategy::Mutation => self.mutation += 1,
            SourceStrategy::Network => self.network += 1,
        }
    }
}

/// Found-vs-unique counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    /// Every raw reference handed to the store, accepted or not
    pub observed: u64,
    /// References the canonicalizer filtered out
    pub rejected: u64,
    /// Accepted references whose key was already present
    pub duplicates: u64,
    /// Strategy invocations that failed (error or panic)
    pub strategy_failures: u64,
    pub inserted: StrategyCounts,
}

#[derive(Debug, Default)]
struct Inner {
    index: HashMap<CanonicalKey, usize>,
    resources: Vec<DiscoveredResource>,
    stats: DiscoveryStats,
}

/// Deduplicating, order-preserving set of discovered resources
#[derive(Debug, Default)]
pub struct DiscoveryStore {
    inner: Mutex<Inner>,
}

impl DiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counters and the index stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold an accepted reference into the store
    ///
    /// Returns `true` when the key was new. A repeat observation only fills
    /// in a missing alt text; the first alt seen for a key is kept.
    pub fn insert(&self, key: CanonicalKey, raw: &RawReference) -> bool {
        let mut inner = self.lock();
        inner.stats.observed += 1;

        if let Some(&position) = inner.index.get(&key) {
            inner.stats.duplicates += 1;
            if let (None, Some(alt)) = (&inner.resources[position].alt, raw.alt()) {
                inner.resources[position].alt = Some(alt.to_string());
            }
            return false;
        }

        let position = inner.resources.len();
        inner.resources.push(DiscoveredResource {
            key: key.clone(),
            alt: raw.alt().map(str::to_string),
            first_seen_at: Utc::now(),
            source: raw.source,
        });
        inner.index.insert(key, position);
        inner.stats.inserted.bump(raw.source);
        true
    }

    /// Count a reference the canonicalizer rejected
    pub fn record_rejection(&self) {
        let mut inner = self.lock();
        inner.stats.observed += 1;
        inner.stats.rejected += 1;
    }

    pub fn record_strategy_failure(&self) {
        self.lock().stats.strategy_failures += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resources in discovery order
    pub fn snapshot(&self) -> Vec<DiscoveredResource> {
        self.lock().resources.clone()
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.lock().stats.clone()
    }
}
