//! # Glean Common Library
//!
//! Shared code for the Glean crates:
//! - Error type and result alias
//! - Event types (GleanEvent enum) and the broadcast EventBus
//! - TOML configuration and root folder resolution
//! - SQLite pool initialization

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
