//! bffcache library
//!
//! A stale-while-revalidate caching layer for backend-for-frontend data
//! sources, plus the source table, response adapter and warmer around it.

pub mod cache;
pub mod cli;
pub mod http;
pub mod refresh;
pub mod responder;
pub mod sources;

pub use cache::{CacheError, CachePolicy, Cacher, CacherConfig, CacheStore, EntryState};
pub use responder::{respond, Payload, Response};
