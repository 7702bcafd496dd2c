//! Integration tests for mutation execution
//!
//! Cache invalidation after writes, pre-write validation, shape checks and
//! audit behavior.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use unidata::prelude::*;
use unidata::ServiceConfig;

const LONG_NOTE: &str = "Starboard engine raw water pump leaking at the shaft seal";

async fn seeded() -> Arc<CountingStore> {
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
    store
}

#[tokio::test(start_paused = true)]
async fn test_mutation_invalidates_cached_reads() {
    let store = seeded().await;
    let service = service(&store);
    let spec = QuerySpec::new("equipment").filter("id", "E1");

    let before = service.query(&spec).await.unwrap();
    assert_eq!(before[0]["status"], json!("due"));

    let updated = service
        .mutate(&MutationSpec::update("equipment", json!({"status": "ok"})).filter("id", "E1"))
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    let after = service.query(&spec).await.unwrap();

    assert_eq!(store.reads("equipment"), 2);
    assert_eq!(after[0]["status"], json!("ok"));
}

#[tokio::test(start_paused = true)]
async fn test_read_in_flight_during_mutation_is_not_cached() {
    let store = seeded().await;
    let service = service(&store);
    let spec = QuerySpec::new("equipment").filter("id", "E1");
    store.hold_reads(Some(Duration::from_millis(200)));

    let (in_flight, updated) = tokio::join!(service.query(&spec), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        service
            .mutate(&MutationSpec::update("equipment", json!({"status": "ok"})).filter("id", "E1"))
            .await
    });
    assert_eq!(in_flight.unwrap()[0]["status"], json!("due"));
    assert_eq!(updated.unwrap().len(), 1);
    assert_eq!(service.stats().await.cache_size, 0);

    store.hold_reads(None);
    let after = service.query(&spec).await.unwrap();
    assert_eq!(after[0]["status"], json!("ok"));
    assert_eq!(store.reads("equipment"), 2);
}

#[tokio::test]
async fn test_invalidation_is_scoped_to_the_table() {
    let store = seeded().await;
    store.seed("crew", vec![json!({"id": "C1", "name": "Ana"})]).await;
    let service = service(&store);

    service.query(&QuerySpec::new("equipment")).await.unwrap();
    service.query(&QuerySpec::new("crew")).await.unwrap();

    service
        .mutate(&MutationSpec::insert("crew", json!({"id": "C2", "name": "Ben"})))
        .await
        .unwrap();

    service.query(&QuerySpec::new("equipment")).await.unwrap();
    let crew = service.query(&QuerySpec::new("crew")).await.unwrap();

    assert_eq!(store.reads("equipment"), 1);
    assert_eq!(store.reads("crew"), 2);
    assert_eq!(crew.len(), 2);
}

#[tokio::test]
async fn test_failed_write_keeps_cache() {
    let store = seeded().await;
    let service = service(&store);
    service.query(&QuerySpec::new("equipment")).await.unwrap();

    let result = service
        .mutate(&MutationSpec::insert("equipment", json!({"id": "E1"})))
        .await;
    assert!(matches!(
        result,
        Err(DataError::MutationFailed { source: StoreError::Constraint { .. }, .. })
    ));
    assert_eq!(service.stats().await.cache_size, 1);
}

#[tokio::test]
async fn test_upsert_and_delete() {
    let store = seeded().await;
    let service = service(&store);

    service
        .mutate(&MutationSpec::upsert(
            "equipment",
            json!([{"id": "E1", "status": "ok"}, {"id": "E9", "status": "new"}]),
        ))
        .await
        .unwrap();

    let deleted = service
        .mutate(
            &MutationSpec::delete("equipment")
                .filter("status", "due")
                .returning("id"),
        )
        .await
        .unwrap();
    assert_eq!(deleted, vec![record(json!({"id": "E2"}))]);

    let rows = store.inner.rows("equipment").await;
    assert_eq!(ids(&rows), vec![json!("E1"), json!("E9")]);
}

#[tokio::test]
async fn test_shape_errors_are_unsupported_operations() {
    let store = seeded().await;
    let service = service(&store);

    let unfiltered_delete = service.mutate(&MutationSpec::delete("equipment")).await;
    assert!(matches!(unfiltered_delete, Err(DataError::UnsupportedOperation(_))));

    let empty_insert = service
        .mutate(&MutationSpec::new("equipment", WriteOperation::Insert))
        .await;
    assert!(matches!(empty_insert, Err(DataError::UnsupportedOperation(_))));

    assert!(store.writes("equipment").is_empty());
}

#[tokio::test]
async fn test_rejected_payload_is_never_written() {
    let store = seeded().await;
    let analysis = FakeAnalysis::new();
    let service = service(&store).with_text_analysis(analysis.clone());

    let result = service
        .mutate(&MutationSpec::insert(
            "equipment",
            json!({"id": "E3", "notes": "FORBIDDEN words in a long maintenance note"}),
        ))
        .await;

    match result {
        Err(DataError::ValidationFailed { table, reason }) => {
            assert_eq!(table, "equipment");
            assert_eq!(reason, "blocked content");
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(store.writes("equipment").is_empty());
    assert_eq!(analysis.validate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_short_payload_skips_validation() {
    let store = seeded().await;
    let analysis = FakeAnalysis::new();
    let service = service(&store).with_text_analysis(analysis.clone());

    service
        .mutate(&MutationSpec::update("equipment", json!({"status": "ok"})).filter("id", "E1"))
        .await
        .unwrap();
    assert_eq!(analysis.validate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_outage_lets_write_through() {
    let store = seeded().await;
    let service = service(&store).with_text_analysis(FakeAnalysis::failing());

    let rows = service
        .mutate(&MutationSpec::insert(
            "equipment",
            json!({"id": "E3", "notes": LONG_NOTE}),
        ))
        .await
        .unwrap();
    assert_eq!(rows[0]["notes"], json!(LONG_NOTE));
}

#[tokio::test]
async fn test_audit_record_is_appended() {
    let store = seeded().await;
    let audit = Arc::new(RecordingAudit::default());
    let service = service(&store).with_audit_sink(Some(audit.clone()));

    service
        .mutate(&MutationSpec::update("equipment", json!({"status": "ok"})).filter("yacht_id", "Y1"))
        .await
        .unwrap();

    let events = audit.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metadata["table"], json!("equipment"));
    assert_eq!(events[0].metadata["operation"], json!("update"));
    assert_eq!(events[0].metadata["record_count"], json!(2));
}

#[tokio::test]
async fn test_default_audit_goes_to_system_logs() {
    let store = seeded().await;
    let service = service(&store);

    service
        .mutate(&MutationSpec::insert("equipment", json!({"id": "E3"})))
        .await
        .unwrap();

    let logs = store.inner.rows("system_logs").await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["event_type"], json!("data_mutation"));
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_mutation() {
    let store = seeded().await;
    let failing = Arc::new(RecordingAudit {
        failing: true,
        ..Default::default()
    });
    let service = service(&store).with_audit_sink(Some(failing));

    let rows = service
        .mutate(&MutationSpec::insert("equipment", json!({"id": "E3"})))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    // The default sink writes through the store; a failing audit table is tolerated too
    let service = DataService::new(
        store.clone(),
        config_with(ServiceConfig::default().with_audit_table(Some("audit".to_string()))),
    );
    store.fail_writes_on(Some("audit"));
    service
        .mutate(&MutationSpec::insert("equipment", json!({"id": "E4"})))
        .await
        .unwrap();
    assert_eq!(store.inner.rows("equipment").await.len(), 4);
}

#[tokio::test]
async fn test_operation_names() {
    let spec = MutationSpec::from_operation_name("equipment", "delete")
        .unwrap()
        .filter("id", "E1");
    assert_eq!(spec.operation, WriteOperation::Delete);
    assert!(matches!(
        MutationSpec::from_operation_name("equipment", "truncate"),
        Err(DataError::UnsupportedOperation(_))
    ));
}
