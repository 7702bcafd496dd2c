//! Store Object - remote store abstraction for unidata
//!
//! This crate provides the predicate model and its SQL rendering, identifier
//! validation, the [`RemoteStore`] contract and its PostgreSQL and
//! in-memory backends.

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

pub mod errors;
pub mod memory;
pub mod postgres;
pub mod prelude;
pub mod query_builder;
pub mod traits;
pub mod validation;

pub use errors::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgRemoteStore;
pub use query_builder::{
    compare_values, escape_like, LogicalOperator, QueryBuilder, QueryCondition, QueryFilter,
    QueryOperator, SortOrder,
};
pub use signal_system::{ChangeEvent, EventType, Record};
pub use traits::*;
pub use validation::{ValidatedFieldName, ValidatedTableName, ValidationError};

use sqlx::PgPool;

pub type DbPool = PgPool;
