//! Convenience re-exports for common unidata usage
//!
//! This prelude module re-exports the most commonly used items from the unidata crates,
//! making it easier to import everything you need with a single use statement.
//!
//! # Example
//!
//! ```rust
//! use unidata::prelude::*;
//!
//! let spec = QuerySpec::new("crew").filter("yacht_id", "Y1");
//! ```

// Core components
pub use crate::core::{DataService, RequestMetrics};
pub use crate::errors::{DataError, GatewayError};
pub use crate::request::{BatchItem, FilterValue, MutationSpec, QuerySpec};
pub use crate::search::SearchOptions;
pub use crate::dedup::DedupReport;

// Collaborators
pub use crate::audit::{AuditEvent, AuditSink};
pub use crate::text_analysis::TextAnalysis;

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, DatabaseConfig};

// Re-export commonly used store-object types for convenience
pub use store_object::prelude::*;

// Re-export signal system for event handling
pub use signal_system::prelude::*;

// Re-export cache system
pub use cache_system::prelude::*;

// Common external dependencies
pub use async_trait;
pub use tokio;
