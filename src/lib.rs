//! Flight Cache - an in-memory TTL cache with durable fallback
//!
//! Concurrent misses for the same key are coalesced into a single fetch.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod upstream;

pub use api::AppState;
pub use cache::CacheEngine;
pub use config::Config;
pub use error::{CacheError, Result};
