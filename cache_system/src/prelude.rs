//! Convenience re-exports for common cache-system usage

// Core cache system components
pub use crate::errors::CacheError;
pub use crate::key::hash_query;
pub use crate::manager::{CacheManager, CacheStats, Generation};

// Re-export centralized config
pub use config::CacheConfig;
