//! Core unidata functionality
//!
//! This module contains the DataService struct: the explicitly constructed
//! owner of the query cache and the subscription registry, and the single
//! entry point application code goes through to reach the remote store.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use cache_system::CacheManager;
use config::AppConfig;
use signal_system::SubscriptionRegistry;
use store_object::{PgRemoteStore, RemoteStore, StoreError};

use crate::audit::{AuditSink, StoreAuditSink, TracingAuditSink};
use crate::enrichment::EnrichmentStage;
use crate::errors::DataError;
use crate::text_analysis::{TextAnalysis, TextAnalysisGateway};

/// Diagnostic counters, derived from cache and registry state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestMetrics {
    pub cache_size: usize,
    pub cache_hit_rate: f64,
    pub active_subscriptions: usize,
    pub duplicate_requests_blocked: u64,
}

/// Unified data access layer over one remote store
pub struct DataService {
    pub(crate) store: Arc<dyn RemoteStore>,
    pub(crate) cache: CacheManager,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) gateway: Option<TextAnalysisGateway>,
    pub(crate) enrichment: EnrichmentStage,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
    pub(crate) config: Arc<AppConfig>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataService")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .field("gateway", &self.gateway)
            .field("audit", &self.audit.is_some())
            .finish()
    }
}

impl DataService {
    /// Create a service over `store`.
    ///
    /// Audit events go to `service.audit_table` in the same store when one is
    /// configured, otherwise to the log. No text analysis provider is attached.
    pub fn new(store: Arc<dyn RemoteStore>, config: AppConfig) -> Self {
        let audit: Arc<dyn AuditSink> = match &config.service.audit_table {
            Some(table) => Arc::new(StoreAuditSink::new(store.clone(), table.clone())),
            None => Arc::new(TracingAuditSink),
        };

        Self {
            store,
            cache: CacheManager::new(config.cache.clone()),
            registry: SubscriptionRegistry::new(),
            gateway: None,
            enrichment: EnrichmentStage::disabled(),
            audit: Some(audit),
            config: Arc::new(config),
            sweeper: Mutex::new(None),
        }
    }

    /// Connect to PostgreSQL and start the cache sweep
    pub async fn connect(config: AppConfig) -> Result<Self, DataError> {
        config.validate()?;
        let store = PgRemoteStore::connect(&config.database)
            .await?
            .with_id_column(&config.service.id_column);

        let service = Self::new(Arc::new(store), config);
        service.start_sweeper();
        Ok(service)
    }

    /// Attach a text analysis provider, enabling validation, enrichment and ranking
    pub fn with_text_analysis(mut self, provider: Arc<dyn TextAnalysis>) -> Self {
        let service = &self.config.service;
        let gateway = TextAnalysisGateway::new(provider, service.analysis_timeout());
        self.enrichment = EnrichmentStage::new(
            Some(gateway.clone()),
            service.enrichment_enabled,
            service.enrichment_min_length,
        );
        self.gateway = Some(gateway);
        self
    }

    /// Replace the audit sink; `None` turns auditing off
    pub fn with_audit_sink(mut self, sink: Option<Arc<dyn AuditSink>>) -> Self {
        self.audit = sink;
        self
    }

    /// Start the periodic cache sweep; a running sweep is replaced
    pub fn start_sweeper(&self) {
        let handle = self.cache.spawn_sweeper(self.config.cache.sweep_interval());
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub async fn stats(&self) -> RequestMetrics {
        let cache = self.cache.stats().await;
        let registry = self.registry.stats();

        RequestMetrics {
            cache_size: cache.entries,
            cache_hit_rate: cache.hit_rate(),
            active_subscriptions: registry.active_subscriptions,
            duplicate_requests_blocked: registry.duplicates_blocked,
        }
    }

    /// Drop cached reads of `table` after an out-of-band change
    pub async fn invalidate_table(&self, table: &str) -> usize {
        self.cache.invalidate_table(table).await
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.clear().await
    }

    /// Close every subscription, stop the sweep and drop the cache
    pub async fn shutdown(&self) {
        let closed = self.registry.close_all();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let dropped = self.cache.clear().await;
        tracing::info!(subscriptions = closed, cache_entries = dropped, "data service shut down");
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.config.service.request_timeout()
    }

    /// Run a remote store call under the request timeout
    pub(crate) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let timeout = self.request_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }
}

impl Drop for DataService {
    fn drop(&mut self) {
        self.registry.close_all();
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}
