//! Cache manager implementation
//!
//! This module provides the main CacheManager struct: an in-memory map of
//! query results with per-entry TTL, lazy expiry on read and a periodic
//! background sweep.

use crate::errors::CacheError;
use crate::key::hash_query;
use config::CacheConfig;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct CacheEntry {
    table: String,
    data: serde_json::Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

/// Invalidation state of one table, captured before a remote read.
///
/// Results fetched under a generation are only cached while it is still
/// current, so a read that raced an invalidation never repopulates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    table: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Bumped by every invalidate_table
    generations: HashMap<String, u64>,
    // Bumped by every clear
    epoch: u64,
}

impl CacheState {
    fn generation(&self, table_name: &str) -> Generation {
        Generation {
            epoch: self.epoch,
            table: self.generations.get(table_name).copied().unwrap_or(0),
        }
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Share of lookups served from the cache, 0.0 when nothing was looked up yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory query cache
#[derive(Clone)]
pub struct CacheManager {
    config: Arc<CacheConfig>,
    state: Arc<RwLock<CacheState>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = match self.state.try_read() {
            Ok(state) => state.entries.len().to_string(),
            Err(_) => "locked".to_string(),
        };

        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("entries", &entries)
            .finish()
    }
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(CacheState::default())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Generate cache key for query results
    fn build_query_key(&self, table_name: &str, query_hash: &str) -> String {
        format!("{}:{}:query:{}", self.config.key_prefix, table_name, query_hash)
    }

    /// Derive the cache key for a query against `table_name`
    pub fn query_key<T: Serialize + ?Sized>(
        &self,
        table_name: &str,
        query: &T,
    ) -> Result<String, CacheError> {
        let query_hash = hash_query(query)?;
        Ok(self.build_query_key(table_name, &query_hash))
    }

    /// Current generation of `table_name`; take it before reading the remote store
    pub async fn generation(&self, table_name: &str) -> Generation {
        self.state.read().await.generation(table_name)
    }

    /// Get query results from cache; expired entries are removed and reported as a miss
    pub async fn get_query<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        if !self.is_enabled() {
            return Ok(None);
        }

        let now = Instant::now();
        let cached = {
            let state = self.state.read().await;
            match state.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Some(entry.data.clone()),
                Some(_) => None,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        };

        match cached {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache hit");
                Ok(Some(serde_json::from_value(data)?))
            }
            None => {
                let mut state = self.state.write().await;
                // Re-check: a writer may have refreshed the entry meanwhile
                if state.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
                    state.entries.remove(key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache entry expired");
                Ok(None)
            }
        }
    }

    /// Set query results in cache
    pub async fn set_query<T>(
        &self,
        table_name: &str,
        key: &str,
        results: &T,
        ttl: Duration,
    ) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.insert_entry(table_name, key, results, ttl, None).await?;
        Ok(())
    }

    /// Set query results fetched under `generation`.
    ///
    /// Returns `false` without storing anything when the table was invalidated
    /// or the cache cleared since the generation was taken.
    pub async fn set_query_if_current<T>(
        &self,
        table_name: &str,
        key: &str,
        results: &T,
        ttl: Duration,
        generation: Generation,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        self.insert_entry(table_name, key, results, ttl, Some(generation)).await
    }

    async fn insert_entry<T>(
        &self,
        table_name: &str,
        key: &str,
        results: &T,
        ttl: Duration,
        generation: Option<Generation>,
    ) -> Result<bool, CacheError>
    where
        T: Serialize + ?Sized,
    {
        if !self.is_enabled() {
            return Ok(false);
        }
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(ttl));
        }

        let data = serde_json::to_value(results)?;
        let entry = CacheEntry {
            table: table_name.to_string(),
            data,
            inserted_at: Instant::now(),
            ttl,
        };

        let mut state = self.state.write().await;
        if generation.is_some_and(|taken| taken != state.generation(table_name)) {
            tracing::debug!(table = %table_name, key = %key, "stale read not cached");
            return Ok(false);
        }
        state.entries.insert(key.to_string(), entry);
        Ok(true)
    }

    /// Default TTL from configuration
    pub fn default_ttl(&self) -> Duration {
        self.config.ttl_duration()
    }

    /// Invalidate all query cache for a table (when data changes)
    pub async fn invalidate_table(&self, table_name: &str) -> usize {
        let mut state = self.state.write().await;
        *state.generations.entry(table_name.to_string()).or_default() += 1;

        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.table != table_name);
        let removed = before - state.entries.len();

        if removed > 0 {
            tracing::debug!(table = %table_name, removed, "invalidated cached queries");
        }
        removed
    }

    /// Delete a single cached query
    pub async fn remove(&self, key: &str) -> bool {
        self.state.write().await.entries.remove(key).is_some()
    }

    /// Drop every entry
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        state.epoch += 1;
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Remove every expired entry regardless of read traffic
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Start the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task stops by itself once every clone of this manager is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let state = Arc::downgrade(&self.state);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };

                let now = Instant::now();
                let mut state = state.write().await;
                let before = state.entries.len();
                state.entries.retain(|_, entry| !entry.is_expired(now));
                let removed = before - state.entries.len();
                drop(state);

                if removed > 0 {
                    tracing::debug!(removed, "cache sweep removed expired entries");
                }
            }
        })
    }

    /// Get current configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> CacheManager {
        CacheManager::new(CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_on_read() {
        let cache = manager();
        let key = cache.query_key("equipment", &json!({"id": "E1"})).unwrap();
        cache
            .set_query("equipment", &key, &vec![json!({"id": "E1"})], Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let hit: Option<Vec<serde_json::Value>> = cache.get_query(&key).await.unwrap();
        assert_eq!(hit.unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let miss: Option<Vec<serde_json::Value>> = cache.get_query(&key).await.unwrap();
        assert!(miss.is_none());
        assert_eq!(cache.len().await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_invalidate_table_only_touches_that_table() {
        let cache = manager();
        let ttl = Duration::from_secs(60);
        let a = cache.query_key("equipment", &json!({"q": 1})).unwrap();
        let b = cache.query_key("equipment", &json!({"q": 2})).unwrap();
        let c = cache.query_key("crew", &json!({"q": 1})).unwrap();

        for (table, key) in [("equipment", &a), ("equipment", &b), ("crew", &c)] {
            cache.set_query(table, key, &json!([]), ttl).await.unwrap();
        }

        assert_eq!(cache.invalidate_table("equipment").await, 2);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get_query::<serde_json::Value>(&c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_started_before_invalidation_is_not_cached() {
        let cache = manager();
        let ttl = Duration::from_secs(60);
        let key = cache.query_key("equipment", &json!({"id": "E1"})).unwrap();

        let generation = cache.generation("equipment").await;
        cache.invalidate_table("equipment").await;
        let stored = cache
            .set_query_if_current("equipment", &key, &json!([{"status": "due"}]), ttl, generation)
            .await
            .unwrap();
        assert!(!stored);
        assert!(cache.is_empty().await);

        let fresh = cache.generation("equipment").await;
        assert!(cache
            .set_query_if_current("equipment", &key, &json!([{"status": "ok"}]), ttl, fresh)
            .await
            .unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_generation_is_per_table_and_reset_by_clear() {
        let cache = manager();
        let ttl = Duration::from_secs(60);

        let crew = cache.generation("crew").await;
        cache.invalidate_table("equipment").await;
        assert!(cache
            .set_query_if_current("crew", "k1", &json!([]), ttl, crew)
            .await
            .unwrap());

        let crew = cache.generation("crew").await;
        cache.clear().await;
        assert!(!cache
            .set_query_if_current("crew", "k2", &json!([]), ttl, crew)
            .await
            .unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_query_on_other_table_gets_other_key() {
        let cache = manager();
        let query = json!({"filters": {"yacht_id": "Y1"}});
        assert_ne!(
            cache.query_key("equipment", &query).unwrap(),
            cache.query_key("crew", &query).unwrap()
        );
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let cache = manager();
        let result = cache.set_query("crew", "k", &json!([]), Duration::ZERO).await;
        assert!(matches!(result, Err(CacheError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_disabled_cache_never_stores() {
        let mut config = CacheConfig::default();
        config.enabled = false;
        let cache = CacheManager::new(config);

        cache
            .set_query("crew", "k", &json!([1]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(cache.is_empty().await);
        assert!(cache.get_query::<serde_json::Value>("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = manager();
        cache
            .set_query("crew", "short", &json!([]), Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set_query("crew", "long", &json!([]), Duration::from_secs(3600))
            .await
            .unwrap();

        let sweeper = cache.spawn_sweeper(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.len().await, 1);
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = manager();
        cache
            .set_query("crew", "k", &json!([]), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);
    }
}
