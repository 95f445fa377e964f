//! HTTP command surface
//!
//! REST endpoints for scan control and collection browsing, plus the SSE
//! event stream.

pub mod collections;
pub mod health;
pub mod scan;
pub mod sse;

pub use collections::collection_routes;
pub use health::health_routes;
pub use scan::scan_routes;
pub use sse::scan_event_stream;
