//! Best-effort enrichment stage
//!
//! Attaches `<field>_processed` and `<field>_language` to long free-text
//! fields. The stage never fails its caller: when the gateway is missing,
//! disabled or failing, records pass through unchanged.

use serde_json::Value;
use signal_system::Record;

use crate::errors::{DataError, GatewayError};
use crate::text_analysis::TextAnalysisGateway;

const PROCESSED_SUFFIX: &str = "_processed";
const LANGUAGE_SUFFIX: &str = "_language";

// Field names that hold identifiers or addresses rather than prose
const EXCLUDED_NAME_PARTS: &[&str] = &["url", "uri", "email", "uuid", "path", "hash", "token", "link"];

fn excluded_name(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    field == "id"
        || field.ends_with("_id")
        || field.ends_with(PROCESSED_SUFFIX)
        || field.ends_with(LANGUAGE_SUFFIX)
        || EXCLUDED_NAME_PARTS.iter().any(|part| field.contains(part))
}

fn identifier_like(text: &str) -> bool {
    let text = text.trim();
    text.starts_with("http://")
        || text.starts_with("https://")
        || (text.contains('@') && !text.contains(char::is_whitespace))
        || uuid::Uuid::parse_str(text).is_ok()
}

/// Optional pipeline stage over query results and change events
#[derive(Debug, Clone)]
pub struct EnrichmentStage {
    gateway: Option<TextAnalysisGateway>,
    enabled: bool,
    min_length: usize,
}

struct Enrichment {
    field: String,
    processed: Value,
    language: Option<String>,
}

impl EnrichmentStage {
    pub fn new(gateway: Option<TextAnalysisGateway>, enabled: bool, min_length: usize) -> Self {
        Self {
            gateway,
            enabled,
            min_length,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false, 0)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.gateway.is_some()
    }

    /// Fields of `record` worth sending to the gateway
    pub fn candidate_fields(&self, record: &Record) -> Vec<String> {
        record
            .iter()
            .filter_map(|(field, value)| match value {
                Value::String(text)
                    if text.chars().count() > self.min_length
                        && !excluded_name(field)
                        && !identifier_like(text) =>
                {
                    Some(field.clone())
                }
                _ => None,
            })
            .collect()
    }

    async fn analyze_record(
        &self,
        gateway: &TextAnalysisGateway,
        table: &str,
        record: &Record,
        fields: &[String],
    ) -> Result<Vec<Enrichment>, GatewayError> {
        let mut enrichments = Vec::new();
        for field in fields {
            let Some(Value::String(text)) = record.get(field) else {
                continue;
            };
            let result = gateway.process(text, table).await?;
            let processed = result
                .processed
                .or_else(|| result.keywords.map(Value::from))
                .unwrap_or(Value::Null);
            enrichments.push(Enrichment {
                field: field.clone(),
                processed,
                language: result.language,
            });
        }
        Ok(enrichments)
    }

    fn apply(record: &mut Record, enrichments: Vec<Enrichment>) {
        for enrichment in enrichments {
            record.insert(
                format!("{}{}", enrichment.field, PROCESSED_SUFFIX),
                enrichment.processed,
            );
            if let Some(language) = enrichment.language {
                record.insert(
                    format!("{}{}", enrichment.field, LANGUAGE_SUFFIX),
                    Value::String(language),
                );
            }
        }
    }

    /// Enrich every record, choosing fields from the first one.
    ///
    /// All or nothing: on any gateway failure the records are left untouched
    /// and the degradation is returned for logging.
    pub async fn try_enrich_records(&self, table: &str, records: &mut [Record]) -> Result<usize, DataError> {
        let Some(gateway) = self.gateway.as_ref().filter(|_| self.enabled) else {
            return Ok(0);
        };
        let Some(first) = records.first() else {
            return Ok(0);
        };
        let fields = self.candidate_fields(first);
        if fields.is_empty() {
            return Ok(0);
        }

        let mut pending = Vec::with_capacity(records.len());
        for record in records.iter() {
            let enrichments = self
                .analyze_record(gateway, table, record, &fields)
                .await
                .map_err(|source| DataError::EnrichmentDegraded {
                    table: table.to_string(),
                    source,
                })?;
            pending.push(enrichments);
        }

        for (record, enrichments) in records.iter_mut().zip(pending) {
            Self::apply(record, enrichments);
        }
        Ok(fields.len())
    }

    /// [`try_enrich_records`](Self::try_enrich_records), logging instead of failing
    pub async fn enrich_records(&self, table: &str, records: &mut [Record]) {
        match self.try_enrich_records(table, records).await {
            Ok(0) => {}
            Ok(fields) => {
                crate::debug_log!(table = %table, fields, records = records.len(), "records enriched");
            }
            Err(e) => tracing::warn!(error = %e, "enrichment degraded, returning unenriched records"),
        }
    }

    /// Enrich a single changed row, choosing fields from the row itself
    pub async fn enrich_record(&self, table: &str, record: &mut Record) {
        self.enrich_records(table, std::slice::from_mut(record)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_analysis::{
        AnalysisOutcome, AnalysisRequest, AnalysisResult, TextAnalysis, ValidationOutcome,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Uppercase {
        fail: bool,
    }

    #[async_trait]
    impl TextAnalysis for Uppercase {
        async fn validate(&self, _text: &str, _context: &str) -> Result<ValidationOutcome, GatewayError> {
            Ok(ValidationOutcome::default())
        }

        async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, GatewayError> {
            if self.fail {
                return Err(GatewayError::Unavailable("offline".to_string()));
            }
            Ok(AnalysisOutcome::ok(AnalysisResult {
                processed: Some(Value::String(request.text.to_uppercase())),
                language: Some("en".to_string()),
                ..Default::default()
            }))
        }
    }

    fn stage(fail: bool) -> EnrichmentStage {
        let gateway = TextAnalysisGateway::new(Arc::new(Uppercase { fail }), Duration::from_secs(1));
        EnrichmentStage::new(Some(gateway), true, 20)
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {}", other),
        }
    }

    const LONG: &str = "Replaced the impeller and checked the seals";

    #[test]
    fn test_candidate_field_heuristics() {
        let row = record(json!({
            "id": "0b6c4c2e-8a9f-4a8e-9d6e-2f1d2b3c4d5e-long-enough-to-qualify",
            "yacht_id": LONG,
            "notes": LONG,
            "manual_url": LONG,
            "contact": "someone.with.a.long.address@example-shipyard.com",
            "website": "https://example.com/a/very/long/path/to/a/manual",
            "short": "ok",
            "hours": 120,
        }));
        assert_eq!(stage(false).candidate_fields(&row), vec!["notes".to_string()]);
    }

    #[tokio::test]
    async fn test_enriches_every_record() {
        let mut rows = vec![
            record(json!({"id": "1", "notes": LONG})),
            record(json!({"id": "2", "notes": "short"})),
        ];
        stage(false).enrich_records("maintenance", &mut rows).await;

        assert_eq!(rows[0]["notes_processed"], json!(LONG.to_uppercase()));
        assert_eq!(rows[0]["notes_language"], json!("en"));
        assert_eq!(rows[1]["notes_processed"], json!("SHORT"));
    }

    #[tokio::test]
    async fn test_failure_leaves_records_untouched() {
        let mut rows = vec![record(json!({"id": "1", "notes": LONG}))];
        let original = rows.clone();

        let result = stage(true).try_enrich_records("maintenance", &mut rows).await;
        assert!(matches!(result, Err(DataError::EnrichmentDegraded { .. })));
        assert_eq!(rows, original);

        stage(true).enrich_records("maintenance", &mut rows).await;
        assert_eq!(rows, original);
    }

    #[tokio::test]
    async fn test_disabled_stage_is_a_no_op() {
        let mut rows = vec![record(json!({"notes": LONG}))];
        EnrichmentStage::disabled().enrich_records("maintenance", &mut rows).await;
        assert_eq!(rows[0].len(), 1);
    }
}
