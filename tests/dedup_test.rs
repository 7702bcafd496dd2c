//! Integration tests for record deduplication

mod common;

use common::*;
use serde_json::{Value, json};
use std::sync::Arc;

async fn inventory() -> Arc<CountingStore> {
    let store = CountingStore::new();
    store
        .seed(
            "inventory",
            vec![
                json!({"id": 3, "sku": "B", "created_at": "2024-03-01T10:00:00Z"}),
                json!({"id": 2, "sku": "A", "created_at": "2024-02-01T10:00:00Z"}),
                json!({"id": 1, "sku": "A", "created_at": "2024-01-01T10:00:00Z"}),
            ],
        )
        .await;
    store
}

async fn remaining_ids(store: &CountingStore) -> Vec<Value> {
    let mut remaining = ids(&store.inner.rows("inventory").await);
    remaining.sort_by_key(|id| id.as_i64());
    remaining
}

#[tokio::test]
async fn test_oldest_row_survives() {
    let store = inventory().await;
    let service = service(&store);

    let report = service.deduplicate("inventory", &["sku"]).await.unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(report.removed, 1);
    assert!(report.errors.is_empty());
    assert_eq!(remaining_ids(&store).await, vec![json!(1), json!(3)]);

    let again = service.deduplicate("inventory", &["sku"]).await.unwrap();
    assert_eq!(again.found, 0);
    assert_eq!(again.removed, 0);
}

#[tokio::test]
async fn test_composite_keys() {
    let store = CountingStore::new();
    store
        .seed(
            "inventory",
            vec![
                json!({"id": 1, "sku": "A", "location": "bow", "created_at": "2024-01-01T00:00:00Z"}),
                json!({"id": 2, "sku": "A", "location": "stern", "created_at": "2024-01-02T00:00:00Z"}),
                json!({"id": 3, "sku": "A", "location": "bow", "created_at": "2024-01-03T00:00:00Z"}),
                json!({"id": 4, "sku": "A", "location": "bow", "created_at": "2024-01-04T00:00:00Z"}),
            ],
        )
        .await;
    let service = service(&store);

    let report = service
        .deduplicate("inventory", &["sku", "location"])
        .await
        .unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(report.removed, 2);
    assert_eq!(remaining_ids(&store).await, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_deletions_invalidate_cached_reads() {
    let store = inventory().await;
    let service = service(&store);
    let spec = unidata::QuerySpec::new("inventory");

    assert_eq!(service.query(&spec).await.unwrap().len(), 3);
    service.deduplicate("inventory", &["sku"]).await.unwrap();
    assert_eq!(service.query(&spec).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_deletes_are_reported() {
    let store = inventory().await;
    let service = service(&store);
    store.fail_writes_on(Some("inventory"));

    let report = service.deduplicate("inventory", &["sku"]).await.unwrap();
    assert_eq!(report.found, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].record_id, json!(2));
    assert_eq!(remaining_ids(&store).await, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_unreadable_table_fails_the_run() {
    let store = inventory().await;
    let service = service(&store);
    store.fail_reads(true);

    let result = service.deduplicate("inventory", &["sku"]).await;
    assert!(matches!(result, Err(unidata::DataError::QueryFailed { .. })));
}

#[tokio::test]
async fn test_key_fields_are_required() {
    let store = inventory().await;
    let service = service(&store);

    let result = service.deduplicate("inventory", &[]).await;
    assert!(matches!(result, Err(unidata::DataError::UnsupportedOperation(_))));
    assert_eq!(store.reads("inventory"), 0);
}
