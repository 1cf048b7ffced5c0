//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that keeps documents as BSON in
//! insertion order behind an async-safe read-write lock.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document};
use tracing::debug;

use tenantlayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{AggregateQuery, AggregateRow, Expr, Query},
    record::ID_FIELD,
    update::{Increment, UpdateReport},
    value::add_numeric,
};

use crate::{
    evaluator::DocumentEvaluator,
    grouping::{aggregate, count_groups, first_per_group, sort_documents},
};

type StoreMap = HashMap<String, Collection>;

/// The documents of one collection in insertion order, indexed by `_id`.
#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    fn push(&mut self, id: String, document: Document) {
        self.positions.insert(id, self.documents.len());
        self.documents.push(document);
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Document> {
        let position = *self.positions.get(id)?;
        self.documents.get_mut(position)
    }

    /// Drops the documents `remove` selects and returns how many went.
    fn remove_where(&mut self, mut remove: impl FnMut(&Document) -> bool) -> usize {
        let before = self.documents.len();
        self.documents.retain(|doc| !remove(doc));

        let removed = before - self.documents.len();
        if removed > 0 {
            self.positions = self
                .documents
                .iter()
                .enumerate()
                .filter_map(|(position, doc)| {
                    doc.get_str(ID_FIELD).ok().map(|id| (id.to_string(), position))
                })
                .collect();
        }
        removed
    }
}


/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait to provide a fully functional
/// document store that operates entirely in memory using async-aware read-write locks.
/// Each collection keeps its documents in insertion order, which is the order unsorted
/// queries return them in.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// Increments run under the write lock, so [`StoreBackend::atomic_increment`] is `true`.
///
/// # Performance
///
/// Each collection keeps an `_id` index, so inserts and compare-and-swap replacements
/// look records up directly. Filtered queries scan all documents in a collection. For
/// larger datasets, consider using a persistent backend like MongoDB.
///
/// Record ids are immutable: raw updates skip `_id`, and a replacement must keep the id
/// of the record it replaces.
///
/// # Example
///
/// ```ignore
/// use tenantlayer_memory::InMemoryStore;
/// use tenantlayer::DocumentStore;
///
/// let store = DocumentStore::new(InMemoryStore::new());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a builder for constructing an [`InMemoryStore`].
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }
}

/// Documents of `documents` matching `filter`, cloned out of the store.
fn matching(documents: &[Document], filter: Option<&Expr>) -> Vec<Document> {
    documents
        .iter()
        .filter(|doc| DocumentEvaluator::matches(doc, filter))
        .cloned()
        .collect()
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        let mut store = self.store.write().await;
        let existing = store.entry(collection.to_string()).or_default();

        // Validate the whole batch before writing any of it
        let mut ids = Vec::with_capacity(documents.len());
        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            let id = doc.get_str(ID_FIELD).map_err(|_| {
                DocumentStoreError::InvalidDocument(format!("document without a string {ID_FIELD}"))
            })?;

            if existing.contains(id) || !seen.insert(id) {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    id.to_string(),
                    collection.to_string(),
                ));
            }
            ids.push(id.to_string());
        }

        debug!(collection, count = documents.len(), "inserting documents");
        for (id, doc) in ids.into_iter().zip(documents) {
            existing.push(id, doc);
        }

        Ok(())
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(collection) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut selected = matching(&collection.documents, query.filter.as_ref());
        sort_documents(&mut selected, &query.sort);

        Ok(
            first_per_group(selected, &query.group_by)
                .into_iter()
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .map(Bson::Document)
                .collect()
        )
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;
        let Some(collection) = store.get(collection) else {
            return Ok(0);
        };

        let selected = matching(&collection.documents, query.filter.as_ref());
        if query.group_by.is_empty() {
            Ok(selected.len() as u64)
        } else {
            Ok(count_groups(selected, &query.group_by))
        }
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        let store = self.store.read().await;
        let selected = store
            .get(collection)
            .map(|collection| matching(&collection.documents, query.filter.as_ref()))
            .unwrap_or_default();

        aggregate(selected, &query.group_by, &query.aggregate)
    }

    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(collection) else {
            return Ok(UpdateReport::default());
        };

        let mut report = UpdateReport::default();
        for doc in collection
            .documents
            .iter_mut()
            .filter(|doc| DocumentEvaluator::matches(doc, Some(&filter)))
        {
            for (key, value) in changes.iter().filter(|(key, _)| key.as_str() != ID_FIELD) {
                doc.insert(key.clone(), value.clone());
            }
            report.matched += 1;
            report.modified += 1;
        }

        Ok(report)
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(collection) else {
            return Ok(UpdateReport::default());
        };
        let documents = &mut collection.documents;

        // Compute every new value first so a non-numeric field leaves the set untouched
        let updates = documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| DocumentEvaluator::matches(doc, Some(&filter)))
            .map(|(index, doc)| {
                add_numeric(&increment.field, doc.get(&increment.field), &increment.delta)
                    .map(|value| (index, value))
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        for (index, value) in &updates {
            let doc = &mut documents[*index];
            doc.insert(increment.field.clone(), value.clone());
            for (key, touched) in &increment.touch {
                doc.insert(key.clone(), touched.clone());
            }
        }

        let count = updates.len() as u64;
        Ok(UpdateReport { matched: count, modified: count, failed: 0 })
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        let Bson::Document(replacement) = replacement else {
            return Err(DocumentStoreError::InvalidDocument(
                "replacement must be a document".to_string(),
            ));
        };
        if replacement.get_str(ID_FIELD).ok() != Some(id) {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "replacement must keep {ID_FIELD} {id}"
            )));
        }

        let mut store = self.store.write().await;
        let Some(current) = store
            .get_mut(collection)
            .and_then(|collection| collection.get_mut(id))
        else {
            return Ok(false);
        };

        if expected.as_document() != Some(&*current) {
            return Ok(false);
        }

        *current = replacement;
        Ok(true)
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(collection) else {
            return Ok(0);
        };

        let removed = collection.remove_where(|doc| DocumentEvaluator::matches(doc, Some(&filter)));

        Ok(removed as u64)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
///
/// Currently a no-op builder, kept so runtime configuration can construct every backend
/// the same way.
///
/// # Example
///
/// ```ignore
/// use tenantlayer_memory::InMemoryStore;
/// use tenantlayer::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use tenantlayer_core::query::{Aggregate, AggregateMethod, Filter, SortDirection};

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                vec![
                    doc! { "_id": "1", "app_id": "a", "n": 1, "tag": "x" },
                    doc! { "_id": "2", "app_id": "a", "n": 3, "tag": "y" },
                    doc! { "_id": "3", "app_id": "b", "n": 5, "tag": "x" },
                ],
                "items",
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn unknown_collections_read_as_empty() {
        let store = InMemoryStore::new();
        assert!(store.query_documents(Query::new(), "nothing").await.unwrap().is_empty());
        assert_eq!(store.count_documents(Query::new(), "nothing").await.unwrap(), 0);
        assert_eq!(store.delete_documents(Filter::eq("a", 1), "nothing").await.unwrap(), 0);

        let rows = store
            .aggregate_documents(
                AggregateQuery { filter: None, group_by: vec![], aggregate: Aggregate::count() },
                "nothing",
            )
            .await
            .unwrap();
        assert_eq!(rows[0].value, Bson::Int64(0));
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_atomically() {
        let store = seeded().await;
        let err = store
            .insert_documents(vec![doc! { "_id": "9" }, doc! { "_id": "1" }], "items")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(id, _) if id == "1"));
        assert_eq!(store.count_documents(Query::new(), "items").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn query_applies_filter_sort_and_window() {
        let store = seeded().await;
        let query = Query::builder()
            .filter(Filter::eq("app_id", "a"))
            .sort("n", SortDirection::Desc)
            .limit(1)
            .build();

        let found = store.query_documents(query, "items").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_document().unwrap().get_str("_id").unwrap(), "2");
    }

    #[tokio::test]
    async fn grouped_counts_count_groups() {
        let store = seeded().await;
        let query = Query::builder().group_by("tag").build();
        assert_eq!(store.count_documents(query.clone(), "items").await.unwrap(), 2);
        assert_eq!(store.query_documents(query, "items").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn increments_apply_to_matching_documents() {
        let store = seeded().await;
        let report = store
            .increment_field(
                Filter::eq("tag", "x"),
                Increment { field: "n".to_string(), delta: Bson::Int64(10), touch: doc! { "t": 1 } },
                "items",
            )
            .await
            .unwrap();
        assert_eq!(report.modified, 2);

        let rows = store
            .aggregate_documents(
                AggregateQuery {
                    filter: None,
                    group_by: vec![],
                    aggregate: Aggregate::of(AggregateMethod::Sum, "n"),
                },
                "items",
            )
            .await
            .unwrap();
        assert_eq!(rows[0].value, Bson::Int64(29));
    }

    #[tokio::test]
    async fn non_numeric_increment_leaves_documents_untouched() {
        let store = seeded().await;
        let err = store
            .increment_field(
                Filter::exists("_id"),
                Increment { field: "tag".to_string(), delta: Bson::Int64(1), touch: Document::new() },
                "items",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

        let untouched = store
            .query_documents(Query::builder().filter(Filter::eq("tag", "x")).build(), "items")
            .await
            .unwrap();
        assert_eq!(untouched.len(), 2);
    }

    #[tokio::test]
    async fn replace_is_compare_and_swap() {
        let store = seeded().await;
        let current = store
            .query_documents(Query::builder().filter(Filter::eq("_id", "1")).build(), "items")
            .await
            .unwrap()
            .remove(0);

        let mut next = current.as_document().unwrap().clone();
        next.insert("n", 2);

        assert!(
            store
                .replace_document("1", current.clone(), Bson::Document(next.clone()), "items")
                .await
                .unwrap()
        );
        // The stored document changed, so the stale expectation no longer matches
        assert!(
            !store
                .replace_document("1", current, Bson::Document(next), "items")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn raw_updates_merge_and_deletes_count() {
        let store = seeded().await;
        let report = store
            .update_documents(Filter::eq("app_id", "a"), doc! { "tag": "z" }, "items")
            .await
            .unwrap();
        assert_eq!(report, UpdateReport { matched: 2, modified: 2, failed: 0 });

        let deleted = store.delete_documents(Filter::eq("tag", "z"), "items").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list_collections().await.unwrap(), vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn id_index_follows_deletes() {
        let store = seeded().await;
        store.delete_documents(Filter::eq("_id", "1"), "items").await.unwrap();

        store
            .insert_documents(vec![doc! { "_id": "1", "app_id": "a", "n": 7 }], "items")
            .await
            .unwrap();

        let third = store
            .query_documents(Query::builder().filter(Filter::eq("_id", "3")).build(), "items")
            .await
            .unwrap()
            .remove(0);
        let mut next = third.as_document().unwrap().clone();
        next.insert("n", 6);
        assert!(
            store
                .replace_document("3", third, Bson::Document(next), "items")
                .await
                .unwrap()
        );

        let ids: Vec<_> = store
            .query_documents(Query::new(), "items")
            .await
            .unwrap()
            .iter()
            .map(|doc| doc.as_document().unwrap().get_str("_id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["2", "3", "1"]);

        let rows = store
            .aggregate_documents(
                AggregateQuery {
                    filter: None,
                    group_by: vec![],
                    aggregate: Aggregate::of(AggregateMethod::Sum, "n"),
                },
                "items",
            )
            .await
            .unwrap();
        assert_eq!(rows[0].value, Bson::Int64(16));
    }

    #[tokio::test]
    async fn ids_cannot_be_rewritten() {
        let store = seeded().await;
        store
            .update_documents(Filter::eq("_id", "1"), doc! { "_id": "9", "n": 2 }, "items")
            .await
            .unwrap();
        let found = store
            .query_documents(Query::builder().filter(Filter::eq("_id", "1")).build(), "items")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_document().unwrap().get_i32("n").unwrap(), 2);

        let current = found[0].clone();
        let mut moved = current.as_document().unwrap().clone();
        moved.insert("_id", "9");
        let err = store
            .replace_document("1", current, Bson::Document(moved), "items")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }
}
