//! Ranked text search

use futures::future::try_join_all;
use serde_json::Value;
use signal_system::Record;
use std::cmp::Ordering;

use store_object::{QueryBuilder, QueryFilter, ReadRequest};

use crate::core::DataService;
use crate::errors::{DataError, GatewayError};
use crate::text_analysis::TextAnalysisGateway;

const DEFAULT_SEARCH_LIMIT: i64 = 50;
const SEARCH_CONTEXT: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Expand the term into keywords through the text analysis gateway
    pub fuzzy: bool,
    /// Re-rank results by similarity to the term
    pub semantic: bool,
    pub limit: i64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            fuzzy: false,
            semantic: false,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchOptions {
    pub fn fuzzy(mut self, fuzzy: bool) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn semantic(mut self, semantic: bool) -> Self {
        self.semantic = semantic;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Text of the searched columns of `record`, space separated
fn searchable_text(record: &Record, columns: &[&str]) -> String {
    columns
        .iter()
        .filter_map(|column| match record.get(*column)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable sort by descending score
fn rank(records: Vec<Record>, scores: Vec<f64>) -> Vec<Record> {
    let mut scored: Vec<(Record, f64)> = records.into_iter().zip(scores).collect();
    scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(record, _)| record).collect()
}

async fn score_all(
    gateway: &TextAnalysisGateway,
    term: &str,
    records: &[Record],
    columns: &[&str],
) -> Result<Vec<f64>, GatewayError> {
    try_join_all(records.iter().map(|record| {
        let text = searchable_text(record, columns);
        async move { gateway.similarity(&text, term, SEARCH_CONTEXT).await }
    }))
    .await
}

impl DataService {
    /// Substring search of `term` over `columns`, optionally keyword-expanded and re-ranked
    pub async fn search(
        &self,
        table: &str,
        term: &str,
        columns: &[&str],
        options: &SearchOptions,
    ) -> Result<Vec<Record>, DataError> {
        let keywords = match (&self.gateway, options.fuzzy) {
            (Some(gateway), true) => match gateway.keywords(term, SEARCH_CONTEXT).await {
                Ok(keywords) => keywords,
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "keyword expansion unavailable, searching the raw term");
                    vec![term.to_string()]
                }
            },
            _ => vec![term.to_string()],
        };

        let matches = columns
            .iter()
            .flat_map(|column| {
                keywords
                    .iter()
                    .map(move |keyword| QueryFilter::contains(column, keyword))
            })
            .collect();
        let request = ReadRequest::new(table).with_query(
            QueryBuilder::new()
                .filter(QueryFilter::or(matches))
                .limit(options.limit),
        );

        let records = self
            .bounded(self.store.read(&request))
            .await
            .map_err(|source| DataError::QueryFailed {
                table: table.to_string(),
                source,
            })?;

        let gateway = match &self.gateway {
            Some(gateway) if options.semantic && !records.is_empty() => gateway,
            _ => return Ok(records),
        };

        match score_all(gateway, term, &records, columns).await {
            Ok(scores) => Ok(rank(records, scores)),
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "similarity ranking unavailable, returning unranked results");
                Ok(records)
            }
        }
    }
}
