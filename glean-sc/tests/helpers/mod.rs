//! Test Helper Utilities
//!
//! Shared builders for replay surfaces, stores and coordinators

#![allow(dead_code)]

pub mod fixtures;
pub mod stores;

pub use fixtures::{acme_fixture, fast_config, key, screen_url, FixtureBuilder, SCREEN_BASE};
pub use stores::{
    coordinator_for, drain_events, memory_store, wait_until_finished, FlakyStore, SlowStore,
};
