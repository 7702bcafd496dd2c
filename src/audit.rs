//! Audit sink
//!
//! Every successful mutation appends one [`AuditEvent`]. Sinks are
//! fire-and-forget from the caller's point of view: the data service logs
//! a failed append and carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use store_object::{RemoteStore, WriteOperation, WriteRequest};

use crate::errors::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub message: String,
    pub module: String,
    pub severity: Severity,
    pub metadata: Value,
}

impl AuditEvent {
    /// Record of a committed mutation
    pub fn mutation(
        table: &str,
        operation: WriteOperation,
        record_count: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: "data_mutation".to_string(),
            message: format!("{} on {}", operation, table),
            module: "unidata".to_string(),
            severity: Severity::Info,
            metadata: json!({
                "table": table,
                "operation": operation.as_str(),
                "record_count": record_count,
                "timestamp": timestamp.to_rfc3339(),
            }),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Appends audit events as rows of a table in the remote store
pub struct StoreAuditSink {
    store: Arc<dyn RemoteStore>,
    table: String,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn RemoteStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let row = serde_json::to_value(event)?;
        let request = WriteRequest::new(self.table.clone(), WriteOperation::Insert).with_data(row);
        self.store.write(&request).await?;
        Ok(())
    }
}

/// Emits audit events as structured log records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "unidata::audit",
            event_type = %event.event_type,
            module = %event.module,
            severity = ?event.severity,
            metadata = %event.metadata,
            "{}",
            event.message
        );
        Ok(())
    }
}
