mod common;

use std::{sync::Arc, time::Duration};

use bson::{Bson, doc};
use serde_json::json;
use tokio::task::JoinSet;

use tenantlayer::{memory::InMemoryStore, prelude::*};

use common::{OptimisticStore, field, number, params, tenant};

async fn record_id<B: StoreBackend>(collection: &TenantCollection<'_, B>, fields: bson::Document) -> String {
    let record = collection.create(fields).await.unwrap();
    field(&record, "_id").as_str().unwrap().to_string()
}

#[tokio::test]
async fn increment_adds_to_the_stored_value() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let counters = store.collection(&alice, "counters").unwrap();
    let id = record_id(&counters, doc! { "count": 3 }).await;

    let update = UpdateSpec::parse(&params(json!({
        "op": { "method": "increment", "field": "count", "value": 5 }
    })))
    .unwrap();
    let record = counters.update_by_id(&id, update).await.unwrap();

    assert_eq!(number(&record, "count"), 8.0);
}

#[tokio::test]
async fn decrement_treats_a_missing_field_as_zero() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let counters = store.collection(&alice, "counters").unwrap();
    let id = record_id(&counters, doc! { "label": "stock" }).await;

    let update = UpdateSpec::parse(&params(json!({
        "op": r#"{"method": "decrement", "field": "stock"}"#
    })))
    .unwrap();
    let record = counters.update_by_id(&id, update).await.unwrap();

    assert_eq!(number(&record, "stock"), -1.0);
    assert_eq!(field(&record, "label").as_str(), Some("stock"));
}

#[tokio::test]
async fn increments_reject_non_numeric_fields() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let counters = store.collection(&alice, "counters").unwrap();
    record_id(&counters, doc! { "count": 1 }).await;
    let id = record_id(&counters, doc! { "count": "many" }).await;

    let err = counters
        .update(None, UpdateSpec::increment("count", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

    // Nothing was written
    let untouched = counters.find(QuerySpec::new()).await.unwrap().into_records();
    assert_eq!(field(&untouched[0], "count"), &Bson::Int32(1));
    assert_eq!(
        field(&counters.find_by_id(&id).await.unwrap(), "count").as_str(),
        Some("many")
    );
}

#[tokio::test]
async fn optimistic_increment_gives_the_same_result() {
    let store = DocumentStore::new(OptimisticStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let counters = store.collection(&alice, "counters").unwrap();
    let id = record_id(&counters, doc! { "count": 3 }).await;

    let record = counters
        .update_by_id(&id, UpdateSpec::increment("count", 5))
        .await
        .unwrap();
    assert_eq!(number(&record, "count"), 8.0);
    assert!(field(&record, "updated_at").as_datetime().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_native_increments_lose_nothing() {
    let store = Arc::new(DocumentStore::new(InMemoryStore::new()));
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let id = record_id(&store.collection(&alice, "counters").unwrap(), doc! { "hits": 0 }).await;

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let store = Arc::clone(&store);
        let ctx = alice.clone();
        let id = id.clone();
        tasks.spawn(async move {
            store
                .collection(&ctx, "counters")
                .unwrap()
                .update_by_id(&id, UpdateSpec::increment("hits", 1))
                .await
                .map(|_| ())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let record = store.collection(&alice, "counters").unwrap().find_by_id(&id).await.unwrap();
    assert_eq!(number(&record, "hits"), 32.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_optimistic_increments_lose_nothing() {
    // Each lost swap is caused by another task's successful one, so a retry budget of N
    // rounds always suffices for N writers.
    let writers = 8;
    let store = Arc::new(DocumentStore::with_config(
        OptimisticStore::new(),
        StoreConfig::new().with_retry(RetryPolicy::new(writers)),
    ));
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let id = record_id(&store.collection(&alice, "counters").unwrap(), doc! { "hits": 0 }).await;

    let mut tasks = JoinSet::new();
    for _ in 0..writers {
        let store = Arc::clone(&store);
        let ctx = alice.clone();
        let id = id.clone();
        tasks.spawn(async move {
            store
                .collection(&ctx, "counters")
                .unwrap()
                .update_by_id(&id, UpdateSpec::increment("hits", 1))
                .await
                .map(|_| ())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let record = store.collection(&alice, "counters").unwrap().find_by_id(&id).await.unwrap();
    assert_eq!(number(&record, "hits"), f64::from(writers));
}

#[tokio::test]
async fn exhausted_retries_report_a_conflict() {
    let retry = RetryPolicy::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(1));
    let store = DocumentStore::with_config(
        OptimisticStore::always_stale(),
        StoreConfig::new().with_retry(retry),
    );
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let counters = store.collection(&alice, "counters").unwrap();
    let id = record_id(&counters, doc! { "count": 3 }).await;

    let err = counters
        .update_by_id(&id, UpdateSpec::increment("count", 1))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        DocumentStoreError::ConcurrentUpdateConflict { field, attempts: 3 } if field == "count"
    ));
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 409);
    assert_eq!(number(&counters.find_by_id(&id).await.unwrap(), "count"), 3.0);
}

#[tokio::test]
async fn raw_updates_merge_fields() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let todos = store.collection(&alice, "todos").unwrap();
    let id = record_id(&todos, doc! { "title": "draft", "done": false, "tags": ["a"] }).await;
    let before = todos.find_by_id(&id).await.unwrap();

    let update = UpdateSpec::parse(&params(json!({
        "data": { "done": true, "_id": "other", "note": "checked" },
        "d": { "done": "ignored" },
    })))
    .unwrap();
    let after = todos.update_by_id(&id, update).await.unwrap();

    assert_eq!(field(&after, "_id").as_str(), Some(id.as_str()));
    assert_eq!(field(&after, "title").as_str(), Some("draft"));
    assert_eq!(field(&after, "done"), &Bson::Boolean(true));
    assert_eq!(field(&after, "note").as_str(), Some("checked"));
    assert_eq!(field(&after, "tags"), field(&before, "tags"));
    assert_eq!(field(&after, "created_at"), field(&before, "created_at"));
    assert!(field(&after, "updated_at").as_datetime() >= field(&before, "updated_at").as_datetime());
}

#[tokio::test]
async fn batch_updates_report_counts() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let todos = store.collection(&alice, "todos").unwrap();
    for (title, done) in [("a", false), ("b", false), ("c", true)] {
        record_id(&todos, doc! { "title": title, "done": done }).await;
    }

    let report = todos
        .update(Some(Filter::eq("done", false)), UpdateSpec::raw(doc! { "done": true }))
        .await
        .unwrap();
    assert_eq!(report, UpdateReport { matched: 2, modified: 2, failed: 0 });

    let report = todos
        .update(Some(Filter::eq("title", "c")), UpdateSpec::increment("views", 2))
        .await
        .unwrap();
    assert_eq!(report.matched, 1);

    let report = todos
        .update(Some(Filter::eq("title", "zzz")), UpdateSpec::raw(doc! { "done": false }))
        .await
        .unwrap();
    assert_eq!(report, UpdateReport::default());
}

#[tokio::test]
async fn deletes_return_removed_counts() {
    let store = DocumentStore::new(InMemoryStore::new());
    let registry = KeyRegistry::new();
    let (alice, _) = tenant(&registry, "alice").await;
    let todos = store.collection(&alice, "todos").unwrap();
    for n in 0..5 {
        record_id(&todos, doc! { "n": n }).await;
    }

    assert_eq!(todos.delete(Some(Filter::gte("n", 3))).await.unwrap(), 2);
    assert_eq!(todos.delete(Some(Filter::gte("n", 3))).await.unwrap(), 0);

    let id = record_id(&todos, doc! { "n": 9 }).await;
    todos.delete_by_id(&id).await.unwrap();
    assert!(matches!(
        todos.delete_by_id(&id).await.unwrap_err(),
        DocumentStoreError::DocumentNotFound(_, _)
    ));

    assert_eq!(todos.delete(None).await.unwrap(), 3);
}
