//! Caching layer between route handlers and upstream getters
//!
//! This module provides an in-process [`CacheStore`] and the [`Cacher`]
//! engine on top of it. Values are served while fresh, served stale while a
//! single background refresh runs, and fetched synchronously only on a cold
//! start. A failed refresh never replaces a previously cached value.

mod engine;
mod entry;
mod error;
mod store;

pub use engine::{CacheStats, Cacher, CacherConfig, DEFAULT_FETCH_TIMEOUT};
pub use entry::{validate_key, CacheEntry, CachePolicy, EntryState, Flight, MAX_KEY_LEN};
pub use error::CacheError;
pub use store::{CacheStore, EntrySummary, Refresh};
