//! Integration tests for batch execution

mod common;

use common::*;
use serde_json::json;
use unidata::prelude::*;

#[tokio::test]
async fn test_batch_isolates_failures_and_keeps_order() {
    let store = CountingStore::new();
    store
        .seed(
            "equipment",
            vec![
                json!({"id": "E1", "yacht_id": "Y1", "status": "due"}),
                json!({"id": "E2", "yacht_id": "Y1", "status": "due"}),
            ],
        )
        .await;
    store.seed("crew", vec![json!({"id": "C1", "name": "Ana"})]).await;
    let service = service(&store);

    let items: Vec<BatchItem> = vec![
        QuerySpec::new("equipment").into(),
        MutationSpec::insert("equipment", json!({"id": "E1", "yacht_id": "Y1"})).into(),
        QuerySpec::new("crew").into(),
        MutationSpec::update("equipment", json!({"status": "ok"}))
            .filter("id", "E2")
            .into(),
        QuerySpec::new("equipment").filter("id", "E2").into(),
    ];

    let results = service.batch(&items).await;
    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|result| result.is_err()).count(), 1);

    assert_eq!(results[0].as_ref().unwrap().len(), 2);
    assert!(matches!(
        results[1],
        Err(DataError::MutationFailed { source: StoreError::Constraint { .. }, .. })
    ));
    assert_eq!(ids(results[2].as_ref().unwrap()), vec![json!("C1")]);
    assert_eq!(results[3].as_ref().unwrap()[0]["status"], json!("ok"));
    // Reads run ahead of the mutations
    assert_eq!(results[4].as_ref().unwrap()[0]["status"], json!("due"));

    assert_eq!(
        store.writes("equipment"),
        vec![WriteOperation::Insert, WriteOperation::Update]
    );
    let rows = store.inner.rows("equipment").await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["status"], json!("ok"));
}

#[tokio::test]
async fn test_failed_read_does_not_stop_mutations() {
    let store = CountingStore::new();
    let service = service(&store);
    store.fail_reads(true);

    let items = vec![
        BatchItem::from(QuerySpec::new("equipment")),
        BatchItem::from(MutationSpec::insert("equipment", json!({"id": "E1"}))),
    ];
    let results = service.batch(&items).await;

    assert!(matches!(results[0], Err(DataError::QueryFailed { .. })));
    assert_eq!(results[1].as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_batch() {
    let store = CountingStore::new();
    let service = service(&store);
    assert!(service.batch(&[]).await.is_empty());
}

#[tokio::test]
async fn test_many_reads_share_the_cache() {
    let store = CountingStore::new();
    store.seed("crew", vec![json!({"id": "C1"})]).await;
    let service = service(&store);

    let items: Vec<BatchItem> = (0..12)
        .map(|i| QuerySpec::new("crew").limit(i % 3 + 1).into())
        .collect();
    let results = service.batch(&items).await;

    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|result| result.as_ref().unwrap().len() == 1));
    // Concurrent misses on the same key may each read, but never more than once per item
    assert!(store.reads("crew") <= 12);
    assert!(store.reads("crew") >= 3);
}
