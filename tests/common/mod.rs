//! Shared test doubles for the data service integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use unidata::prelude::*;
use unidata::store_object::{ChangeChannel, QueryBuilder};
use unidata::{
    AnalysisOutcome, AnalysisRequest, AnalysisResult, AnalysisTask, AuditError, ServiceConfig,
    ValidationOutcome,
};

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

pub fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().map(|row| row["id"].clone()).collect()
}

/// MemoryStore that counts calls and fails on demand
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    reads: Mutex<HashMap<String, usize>>,
    writes: Mutex<Vec<(String, WriteOperation)>>,
    channel_opens: AtomicUsize,
    fail_reads: AtomicBool,
    fail_channels: AtomicBool,
    fail_writes_on: Mutex<Option<String>>,
    read_delay: Mutex<Option<Duration>>,
    read_hold: Mutex<Option<Duration>>,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        self.inner
            .seed(table, rows.into_iter().map(record).collect())
            .await;
    }

    pub fn reads(&self, table: &str) -> usize {
        self.reads.lock().get(table).copied().unwrap_or(0)
    }

    /// Successful and failed writes against `table`, in call order
    pub fn writes(&self, table: &str) -> Vec<WriteOperation> {
        self.writes
            .lock()
            .iter()
            .filter(|(written, _)| written == table)
            .map(|(_, operation)| *operation)
            .collect()
    }

    pub fn channel_opens(&self) -> usize {
        self.channel_opens.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_channels(&self, fail: bool) {
        self.fail_channels.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_on(&self, table: Option<&str>) {
        *self.fail_writes_on.lock() = table.map(str::to_string);
    }

    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Take the read snapshot immediately, but return it only after `hold`
    pub fn hold_reads(&self, hold: Option<Duration>) {
        *self.read_hold.lock() = hold;
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    async fn read(&self, request: &ReadRequest) -> Result<Vec<Record>, StoreError> {
        *self.reads.lock().entry(request.table.clone()).or_default() += 1;

        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidRequest("injected read failure".to_string()));
        }
        let rows = self.inner.read(request).await;
        let hold = *self.read_hold.lock();
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }
        rows
    }

    async fn write(&self, request: &WriteRequest) -> Result<Vec<Record>, StoreError> {
        self.writes
            .lock()
            .push((request.table.clone(), request.operation));

        let fail = self.fail_writes_on.lock().as_deref() == Some(request.table.as_str());
        if fail {
            return Err(StoreError::InvalidRequest("injected write failure".to_string()));
        }
        self.inner.write(request).await
    }

    async fn open_change_channel(
        &self,
        table: &str,
        filter: Option<&QueryBuilder>,
        buffer: usize,
    ) -> Result<ChangeChannel, StoreError> {
        if self.fail_channels.load(Ordering::SeqCst) {
            return Err(StoreError::ChannelClosed("injected channel failure".to_string()));
        }
        self.channel_opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open_change_channel(table, filter, buffer).await
    }
}

/// Deterministic text analysis provider.
///
/// Validation rejects text containing `FORBIDDEN`. Similarity is the share of
/// words of the text that occur in the reference.
#[derive(Default)]
pub struct FakeAnalysis {
    keywords: HashMap<String, Vec<String>>,
    failing: AtomicBool,
    pub validate_calls: AtomicUsize,
    pub analyze_calls: AtomicUsize,
}

impl FakeAnalysis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_keywords(term: &str, keywords: &[&str]) -> Arc<Self> {
        let mut analysis = Self::default();
        analysis.keywords.insert(
            term.to_string(),
            keywords.iter().map(|k| k.to_string()).collect(),
        );
        Arc::new(analysis)
    }

    pub fn failing() -> Arc<Self> {
        let analysis = Self::default();
        analysis.failing.store(true, Ordering::SeqCst);
        Arc::new(analysis)
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("provider offline".to_string()));
        }
        Ok(())
    }
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

#[async_trait]
impl TextAnalysis for FakeAnalysis {
    async fn validate(&self, text: &str, _context: &str) -> Result<ValidationOutcome, GatewayError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let rejected = text.contains("FORBIDDEN");
        Ok(ValidationOutcome {
            success: !rejected,
            result: None,
            error: rejected.then(|| "blocked content".to_string()),
        })
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, GatewayError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let result = match &request.task {
            AnalysisTask::Keywords => AnalysisResult {
                keywords: Some(self.keywords.get(&request.text).cloned().unwrap_or_default()),
                ..Default::default()
            },
            AnalysisTask::DetectLanguage => AnalysisResult {
                language: Some("en".to_string()),
                ..Default::default()
            },
            AnalysisTask::Similarity { reference } => {
                let reference = words(reference);
                let text = words(&request.text);
                let hits = text.iter().filter(|w| reference.contains(w)).count();
                AnalysisResult {
                    similarity: Some(hits as f64 / text.len().max(1) as f64),
                    ..Default::default()
                }
            }
            AnalysisTask::Process => AnalysisResult {
                processed: Some(json!(request.text.to_lowercase())),
                language: Some("en".to_string()),
                ..Default::default()
            },
        };
        Ok(AnalysisOutcome::ok(result))
    }
}

/// Audit sink that keeps events, or fails every append
#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<AuditEvent>>,
    pub failing: bool,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if self.failing {
            return Err(AuditError::Rejected("audit table unavailable".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

pub fn config() -> AppConfig {
    AppConfig::default()
}

pub fn config_with(service: ServiceConfig) -> AppConfig {
    AppConfig {
        service,
        ..AppConfig::default()
    }
}

pub fn service(store: &Arc<CountingStore>) -> DataService {
    DataService::new(store.clone(), config())
}
