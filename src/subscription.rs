//! Deduplicated change subscriptions
//!
//! One upstream change channel per signature. A delivery task drains the
//! channel, enriches each changed row, invalidates cached reads of the
//! table and fans the event out to every listener of the registration.

use std::sync::Arc;

use signal_system::{ChangeCallback, ChangeEvent, Registration, SubscriptionHandle};
use store_object::StoreError;

use crate::core::DataService;
use crate::errors::DataError;
use crate::request::QuerySpec;

impl DataService {
    /// Subscribe `callback` to changes matching `spec`.
    ///
    /// Equivalent specs share one upstream channel; each caller still gets its
    /// own handle, and the channel closes when the last handle unsubscribes or
    /// is dropped. `callback` runs on the delivery task and must not block.
    pub async fn subscribe<F>(&self, spec: &QuerySpec, callback: F) -> Result<SubscriptionHandle, DataError>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        let signature = spec.signature()?;

        if let Some(handle) = self.registry.attach(&signature, callback.clone()) {
            return Ok(handle);
        }

        let subscription = &self.config.subscription;
        let filter = spec.filter_query();
        let filter = filter.has_conditions().then_some(&filter);
        let timeout = subscription.open_timeout();

        let channel = tokio::time::timeout(
            timeout,
            self.store
                .open_change_channel(&spec.table, filter, subscription.channel_buffer),
        )
        .await
        .map_err(|_| StoreError::Timeout(timeout))
        .and_then(|opened| opened)
        .map_err(|source| DataError::SubscriptionFailed {
            table: spec.table.clone(),
            source,
        })?;

        let registration = Registration::new(signature.clone(), spec.table.clone());
        let (mut events, closer) = channel.into_parts();
        let handle = self.registry.install(
            registration.clone(),
            callback,
            Box::new(move || closer.close()),
        );

        // Ends once the teardown closes the channel
        let cache = self.cache.clone();
        let enrichment = self.enrichment.clone();
        tokio::spawn(async move {
            while let Some(mut event) = events.recv().await {
                if let Some(record) = event.new.as_mut() {
                    enrichment.enrich_record(&event.table_name, record).await;
                }
                cache.invalidate_table(registration.table()).await;

                let delivered = registration.dispatch(&event);
                crate::trace_log!(
                    signature = %registration.signature(),
                    event_type = %event.event_type,
                    delivered,
                    "change delivered"
                );
            }
            crate::debug_log!(signature = %registration.signature(), "delivery task finished");
        });

        tracing::debug!(signature = %signature, table = %spec.table, "subscription opened");
        Ok(handle)
    }
}
