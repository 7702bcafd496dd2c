//! Cached query execution

use signal_system::Record;

use crate::core::DataService;
use crate::errors::DataError;
use crate::request::QuerySpec;

impl DataService {
    /// Resolve a read: cache first, then the remote store.
    ///
    /// Results are enriched (best-effort) before they are cached, so a hit
    /// returns exactly what the populating call returned.
    pub async fn query(&self, spec: &QuerySpec) -> Result<Vec<Record>, DataError> {
        let key = if spec.cached && self.cache.is_enabled() {
            Some(self.cache.query_key(&spec.table, spec)?)
        } else {
            None
        };

        if let Some(key) = &key {
            match self.cache.get_query::<Vec<Record>>(key).await {
                Ok(Some(records)) => {
                    crate::debug_log!(table = %spec.table, records = records.len(), "served from cache");
                    return Ok(records);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(table = %spec.table, error = %e, "unreadable cache entry, refetching"),
            }
        }

        // Taken before the read: a mutation landing meanwhile makes the result uncacheable
        let generation = match &key {
            Some(_) => Some(self.cache.generation(&spec.table).await),
            None => None,
        };

        let request = spec.to_read_request();
        let mut records = self
            .bounded(self.store.read(&request))
            .await
            .map_err(|source| DataError::QueryFailed {
                table: spec.table.clone(),
                source,
            })?;

        self.enrichment
            .enrich_records(&spec.table, &mut records)
            .await;

        if let (Some(key), Some(generation)) = (&key, generation) {
            let ttl = spec.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
            match self
                .cache
                .set_query_if_current(&spec.table, key, &records, ttl, generation)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    crate::debug_log!(table = %spec.table, "table changed during read, result not cached");
                }
                Err(e) => tracing::warn!(table = %spec.table, error = %e, "query result not cached"),
            }
        }

        crate::trace_log!(table = %spec.table, records = records.len(), "query executed");
        Ok(records)
    }
}
