//! Record deduplication
//!
//! Groups the rows of a table by a key-field tuple, keeps the oldest row of
//! each group and deletes the rest through the regular mutation path, so
//! every deletion invalidates the cache and is audited.

use serde_json::Value;
use signal_system::Record;
use std::collections::HashMap;

use store_object::{QueryBuilder, ReadRequest, SortOrder};

use crate::core::DataService;
use crate::errors::DataError;
use crate::request::MutationSpec;

/// A row that could not be removed
#[derive(Debug)]
pub struct DedupFailure {
    pub record_id: Value,
    pub error: DataError,
}

/// Outcome of one deduplication run
#[derive(Debug, Default)]
pub struct DedupReport {
    /// Groups with more than one member
    pub found: usize,
    pub removed: usize,
    pub errors: Vec<DedupFailure>,
}

/// Group key of `record`, `None` when any key field is missing or null
fn group_key(record: &Record, key_fields: &[&str]) -> Option<String> {
    let values = key_fields
        .iter()
        .map(|field| record.get(*field).filter(|value| !value.is_null()))
        .collect::<Option<Vec<&Value>>>()?;
    // A JSON array keeps ("ab", "c") and ("a", "bc") apart
    serde_json::to_string(&values).ok()
}

/// Groups in first-seen order, members in input order
fn duplicate_groups(records: Vec<Record>, key_fields: &[&str]) -> Vec<Vec<Record>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Record>> = Vec::new();

    for record in records {
        let Some(key) = group_key(&record, key_fields) else {
            continue;
        };
        match index.get(&key) {
            Some(&position) => groups[position].push(record),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![record]);
            }
        }
    }

    groups.retain(|group| group.len() > 1);
    groups
}

impl DataService {
    /// Delete every row that repeats an older row's `key_fields` values
    pub async fn deduplicate(&self, table: &str, key_fields: &[&str]) -> Result<DedupReport, DataError> {
        if key_fields.is_empty() {
            return Err(DataError::UnsupportedOperation(format!(
                "deduplicate on {} without key fields",
                table
            )));
        }

        let service = &self.config.service;
        let request = ReadRequest::new(table).with_query(
            QueryBuilder::new()
                .order_by(&service.created_column, SortOrder::Asc)
                .order_by(&service.id_column, SortOrder::Asc),
        );
        let records = self
            .bounded(self.store.read(&request))
            .await
            .map_err(|source| DataError::QueryFailed {
                table: table.to_string(),
                source,
            })?;

        let groups = duplicate_groups(records, key_fields);
        let mut report = DedupReport {
            found: groups.len(),
            ..Default::default()
        };

        for group in groups {
            for duplicate in group.into_iter().skip(1) {
                let record_id = duplicate
                    .get(&service.id_column)
                    .cloned()
                    .unwrap_or(Value::Null);
                if record_id.is_null() {
                    report.errors.push(DedupFailure {
                        record_id,
                        error: DataError::UnsupportedOperation(format!(
                            "duplicate in {} has no {}",
                            table, service.id_column
                        )),
                    });
                    continue;
                }

                let delete = MutationSpec::delete(table).filter(service.id_column.clone(), record_id.clone());
                match self.mutate(&delete).await {
                    Ok(deleted) if !deleted.is_empty() => report.removed += 1,
                    Ok(_) => {}
                    Err(error) => report.errors.push(DedupFailure { record_id, error }),
                }
            }
        }

        tracing::info!(
            table = %table,
            found = report.found,
            removed = report.removed,
            failed = report.errors.len(),
            "deduplication finished"
        );
        Ok(report)
    }
}
