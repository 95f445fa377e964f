//! Data model for scanning and collections

mod collection;
mod reference;
mod session;

pub use collection::{collection_id_for, Collection, CollectionEntry, CollectionSummary};
pub use reference::{CanonicalKey, DiscoveredResource, RawReference, SizeHint, SourceStrategy};
pub use session::{MergeReport, ScanOutcome, SessionSnapshot};
