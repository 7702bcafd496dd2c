//! Mutation execution
//!
//! Validate, write, invalidate, audit. Cache invalidation happens after the
//! remote write succeeded and before the call returns.

use chrono::Utc;
use serde_json::Value;
use signal_system::Record;

use crate::audit::AuditEvent;
use crate::core::DataService;
use crate::errors::DataError;
use crate::request::MutationSpec;

fn has_long_string(value: &Value, min_length: usize) -> bool {
    match value {
        Value::String(text) => text.chars().count() > min_length,
        Value::Array(items) => items.iter().any(|item| has_long_string(item, min_length)),
        Value::Object(fields) => fields.values().any(|item| has_long_string(item, min_length)),
        _ => false,
    }
}

impl DataService {
    pub async fn mutate(&self, spec: &MutationSpec) -> Result<Vec<Record>, DataError> {
        spec.check()?;
        self.validate_payload(spec).await?;

        let request = spec.to_write_request();
        let records = self
            .bounded(self.store.write(&request))
            .await
            .map_err(|source| DataError::MutationFailed {
                table: spec.table.clone(),
                source,
            })?;

        let invalidated = self.cache.invalidate_table(&spec.table).await;
        crate::debug_log!(
            table = %spec.table,
            operation = %spec.operation,
            records = records.len(),
            invalidated,
            "mutation applied"
        );

        self.append_audit(spec, records.len()).await;
        Ok(records)
    }

    /// Content validation of long text payloads; a gateway outage lets the write through
    async fn validate_payload(&self, spec: &MutationSpec) -> Result<(), DataError> {
        let (Some(gateway), Some(data)) = (&self.gateway, &spec.data) else {
            return Ok(());
        };
        if !has_long_string(data, self.config.service.validation_min_length) {
            return Ok(());
        }

        let text = serde_json::to_string(data).map_err(|e| DataError::ValidationFailed {
            table: spec.table.clone(),
            reason: e.to_string(),
        })?;

        match gateway.validate(&text, &spec.table).await {
            Ok(outcome) if outcome.success => Ok(()),
            Ok(outcome) => Err(DataError::ValidationFailed {
                table: spec.table.clone(),
                reason: outcome
                    .error
                    .unwrap_or_else(|| "rejected without reason".to_string()),
            }),
            Err(e) => {
                tracing::warn!(table = %spec.table, error = %e, "payload validation unavailable, writing unvalidated");
                Ok(())
            }
        }
    }

    async fn append_audit(&self, spec: &MutationSpec, record_count: usize) {
        let Some(sink) = &self.audit else {
            return;
        };

        let event = AuditEvent::mutation(&spec.table, spec.operation, record_count, Utc::now());
        let appended = tokio::time::timeout(self.request_timeout(), sink.append(&event)).await;
        match appended {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(table = %spec.table, error = %e, "audit append failed"),
            Err(_) => tracing::warn!(table = %spec.table, "audit append timed out"),
        }
    }
}
