//! Error types for the unidata crate
//!
//! This module contains all error types that can be returned by data service operations,
//! plus the errors reported by the text analysis and audit collaborators.

use std::time::Duration;

use cache_system::CacheError;
use config::ConfigError;
use store_object::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Query on {table} failed: {source}")]
    QueryFailed {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Mutation on {table} failed: {source}")]
    MutationFailed {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Payload for {table} rejected by validation: {reason}")]
    ValidationFailed { table: String, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Subscription on {table} failed: {source}")]
    SubscriptionFailed {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Enrichment skipped for {table}: {source}")]
    EnrichmentDegraded {
        table: String,
        #[source]
        source: GatewayError,
    },

    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DataError {
    /// Table the failed operation targeted, when there is one
    pub fn table(&self) -> Option<&str> {
        match self {
            DataError::QueryFailed { table, .. }
            | DataError::MutationFailed { table, .. }
            | DataError::ValidationFailed { table, .. }
            | DataError::SubscriptionFailed { table, .. }
            | DataError::EnrichmentDegraded { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DataError::QueryFailed { source: StoreError::Timeout(_), .. }
                | DataError::MutationFailed { source: StoreError::Timeout(_), .. }
                | DataError::SubscriptionFailed { source: StoreError::Timeout(_), .. }
                | DataError::Store(StoreError::Timeout(_))
        )
    }
}

/// Failure of a text analysis call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Text analysis unavailable: {0}")]
    Unavailable(String),

    #[error("Text analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Text analysis reported failure: {0}")]
    Unsuccessful(String),

    #[error("Text analysis response missing {0}")]
    MissingResult(&'static str),
}

/// Failure to append an audit record
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit sink rejected event: {0}")]
    Rejected(String),
}
