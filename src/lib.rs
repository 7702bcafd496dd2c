//! # unidata
//!
//! A unified data access layer between application code and a remote
//! relational store: cached queries, mutations that invalidate the cache,
//! deduplicated change subscriptions, batches, ranked text search and
//! record deduplication.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unidata::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let service = DataService::connect(config).await?;
//!
//!     let equipment = QuerySpec::new("equipment")
//!         .filter("yacht_id", "Y1")
//!         .order_by("name", true)
//!         .cache_ttl(std::time::Duration::from_secs(60));
//!     let rows = service.query(&equipment).await?;
//!     println!("{} items", rows.len());
//!
//!     service
//!         .mutate(&MutationSpec::update("equipment", json!({"status": "ok"})).filter("id", "E1"))
//!         .await?;
//!
//!     let handle = service
//!         .subscribe(&equipment, |event| println!("{} on {}", event.event_type, event.table_name))
//!         .await?;
//!     handle.unsubscribe();
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

pub mod audit;
pub mod batch;
pub mod core;
pub mod dedup;
pub mod enrichment;
pub mod errors;
pub mod mutation;
pub mod prelude;
pub mod query;
pub mod request;
pub mod search;
pub mod subscription;
pub mod text_analysis;

// Re-export the main public types for convenience
pub use audit::{AuditEvent, AuditSink, Severity, StoreAuditSink, TracingAuditSink};
pub use batch::BatchResult;
pub use core::{DataService, RequestMetrics};
pub use dedup::{DedupFailure, DedupReport};
pub use enrichment::EnrichmentStage;
pub use errors::{AuditError, DataError, GatewayError};
pub use request::{BatchItem, FilterValue, MutationSpec, OrderBy, QuerySpec};
pub use search::SearchOptions;
pub use text_analysis::{
    AnalysisOutcome, AnalysisRequest, AnalysisResult, AnalysisTask, TextAnalysis,
    TextAnalysisGateway, ValidationOutcome,
};

// Re-export centralized config
pub use config::{AppConfig, CacheConfig, DatabaseConfig, ServiceConfig, SubscriptionConfig};

// Re-export internal crates used by the public API
pub use cache_system;
pub use signal_system;
pub use store_object;

// Re-export external dependencies used in public API
pub use async_trait;
