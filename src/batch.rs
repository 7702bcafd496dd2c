//! Batch execution
//!
//! Reads run first, concurrently, bounded by `batch_read_concurrency`.
//! Mutations follow one at a time in input order. Every item yields its own
//! result; one failure never aborts its siblings.

use futures::stream::{self, StreamExt};
use signal_system::Record;

use crate::core::DataService;
use crate::errors::DataError;
use crate::request::BatchItem;

pub type BatchResult = Result<Vec<Record>, DataError>;

impl DataService {
    /// Execute `items`, returning one result per item in input order
    pub async fn batch(&self, items: &[BatchItem]) -> Vec<BatchResult> {
        let mut results: Vec<Option<BatchResult>> = items.iter().map(|_| None).collect();

        let reads = items.iter().enumerate().filter_map(|(index, item)| match item {
            BatchItem::Query(spec) => Some((index, spec)),
            BatchItem::Mutation(_) => None,
        });
        let concurrency = self.config.service.batch_read_concurrency.max(1);
        let read_results: Vec<(usize, BatchResult)> = stream::iter(reads)
            .map(|(index, spec)| async move { (index, self.query(spec).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (index, result) in read_results {
            results[index] = Some(result);
        }

        for (index, item) in items.iter().enumerate() {
            if let BatchItem::Mutation(spec) = item {
                results[index] = Some(self.mutate(spec).await);
            }
        }

        let failed = results
            .iter()
            .filter(|result| matches!(result, Some(Err(_))))
            .count();
        if failed > 0 {
            tracing::warn!(items = items.len(), failed, "batch finished with failures");
        }

        // Every slot was filled above
        results.into_iter().flatten().collect()
    }
}
