#![allow(dead_code)]

use async_trait::async_trait;
use bson::{Bson, Document};
use serde_json::Value;

use tenantlayer::{
    memory::InMemoryStore,
    prelude::*,
    query::{AggregateQuery, AggregateRow},
    value::as_f64,
};

pub async fn tenant(registry: &KeyRegistry, name: &str) -> (RequestContext, String) {
    let (tenant, key) = registry.provision(name).await.expect("provision tenant");
    (RequestContext::new(tenant.id), key.key)
}

pub fn params(value: Value) -> RequestParams {
    RequestParams::from_value(value)
}

pub fn field<'a>(record: &'a Bson, name: &str) -> &'a Bson {
    record
        .as_document()
        .and_then(|doc| doc.get(name))
        .unwrap_or(&Bson::Null)
}

pub fn number(record: &Bson, name: &str) -> f64 {
    as_f64(field(record, name)).unwrap_or_else(|| panic!("{name} is not numeric in {record}"))
}

pub fn strings(records: &[Bson], name: &str) -> Vec<String> {
    records
        .iter()
        .map(|record| field(record, name).as_str().unwrap_or_default().to_string())
        .collect()
}

/// An in-memory store that hides its native increment, forcing compare-and-swap.
///
/// A stale store additionally reports every swap as lost.
#[derive(Debug, Clone, Default)]
pub struct OptimisticStore {
    inner: InMemoryStore,
    stale: bool,
}

impl OptimisticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_stale() -> Self {
        Self { inner: InMemoryStore::new(), stale: true }
    }
}

#[async_trait]
impl StoreBackend for OptimisticStore {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        self.inner.insert_documents(documents, collection).await
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        self.inner.query_documents(query, collection).await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.count_documents(query, collection).await
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        self.inner.aggregate_documents(query, collection).await
    }

    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        self.inner.update_documents(filter, changes, collection).await
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        if self.stale {
            return Ok(false);
        }
        self.inner.replace_document(id, expected, replacement, collection).await
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        self.inner.delete_documents(filter, collection).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.inner.list_collections().await
    }
}
