//! Cache system for query result caching
//!
//! This crate provides an in-memory, TTL-bounded cache of query results
//! with table-level invalidation and a background expiry sweep.

pub mod errors;
pub mod key;
pub mod manager;
pub mod prelude;

// Re-export centralized config
pub use config::CacheConfig;

pub use errors::CacheError;
pub use key::hash_query;
pub use manager::{CacheManager, CacheStats, Generation};
