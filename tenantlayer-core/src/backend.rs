//! Storage backend abstraction for the document store.
//!
//! This module defines the traits that abstract over storage implementations, allowing the
//! tenant layer to run against an in-memory map or a MongoDB database alike.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for inserting, querying,
//! counting, aggregating, updating and deleting documents selected by filter expressions.
//! Implementations are required to be thread-safe (`Send + Sync`) and support concurrent
//! access.
//!
//! Backends never apply tenant scoping themselves. Every filter they receive from the
//! collection layer has already been confined to one tenant by [`crate::scope`].
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use tenantlayer::backend::StoreBackend;
//! use tenantlayer::query::{Filter, Query};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend.insert_documents(vec![doc! { "_id": "1", "name": "Alice" }], "users").await?;
//!
//! let query = Query::builder().filter(Filter::eq("name", "Alice")).build();
//! let found = backend.query_documents(query, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{AggregateQuery, AggregateRow, Expr, Query},
    update::{Increment, UpdateReport},
};

/// Abstract interface for document storage backends.
///
/// Documents are BSON documents carrying a string `_id`. Collections come into existence on
/// first insert; reading a collection that was never written behaves like reading an empty
/// one.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific but should be
/// documented by the implementer.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Connectivity and driver failures surface as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentAlreadyExists`] if a document with the same
    /// `_id` is already stored.
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()>;

    /// Queries documents using a structured query.
    ///
    /// Applies, in order: the filter, the sort keys (stable, multi-key), grouping (first
    /// document per distinct group key), then offset and limit.
    ///
    /// # See Also
    ///
    /// - [`Query`] for constructing queries
    /// - [`crate::query::Filter`] for building filter expressions
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Counts the documents a query would return before offset and limit are applied.
    ///
    /// When the query groups, this is the number of distinct groups.
    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64>;

    /// Computes an aggregate over the matching documents, once per group when grouping.
    ///
    /// Ungrouped aggregations return at most one row with an empty `group`. Grouped rows
    /// are ordered by group key ascending. Backends may return no rows for an empty
    /// ungrouped set; callers normalize that case.
    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>>;

    /// Merges `changes` into every matching document.
    ///
    /// Best-effort across documents: a failure on one document is counted in the report and
    /// does not undo the others.
    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport>;

    /// Whether [`StoreBackend::increment_field`] is a native atomic operation.
    ///
    /// Backends that return `false` are driven through optimistic compare-and-swap using
    /// [`StoreBackend::replace_document`].
    fn atomic_increment(&self) -> bool {
        false
    }

    /// Atomically adds `increment.delta` to a numeric field of every matching document and
    /// merges `increment.touch` into it.
    async fn increment_field(
        &self,
        _filter: Expr,
        _increment: Increment,
        _collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        Err(DocumentStoreError::Backend(
            "atomic increments are not supported by this backend".to_string(),
        ))
    }

    /// Replaces a document only if it still equals `expected`.
    ///
    /// Returns `false` when the stored document changed or disappeared since it was read.
    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool>;

    /// Deletes every matching document and returns how many were removed.
    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64>;

    /// Lists the names of all collections in the store.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        <B as StoreBackend>::insert_documents(*self, documents, collection).await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        <B as StoreBackend>::query_documents(*self, query, collection).await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        <B as StoreBackend>::count_documents(*self, query, collection).await
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        <B as StoreBackend>::aggregate_documents(*self, query, collection).await
    }

    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        <B as StoreBackend>::update_documents(*self, filter, changes, collection).await
    }

    fn atomic_increment(&self) -> bool {
        <B as StoreBackend>::atomic_increment(*self)
    }

    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        <B as StoreBackend>::increment_field(*self, filter, increment, collection).await
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        <B as StoreBackend>::replace_document(*self, id, expected, replacement, collection).await
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        <B as StoreBackend>::delete_documents(*self, filter, collection).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        <B as StoreBackend>::list_collections(*self).await
    }
}

#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()>;
    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>>;
    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64>;
    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>>;
    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport>;
    fn atomic_increment(&self) -> bool;
    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport>;
    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool>;
    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64>;
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;
    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()>;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        StoreBackend::insert_documents(self, documents, collection).await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        StoreBackend::query_documents(self, query, collection).await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        StoreBackend::count_documents(self, query, collection).await
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        StoreBackend::aggregate_documents(self, query, collection).await
    }

    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        StoreBackend::update_documents(self, filter, changes, collection).await
    }

    fn atomic_increment(&self) -> bool {
        StoreBackend::atomic_increment(self)
    }

    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        StoreBackend::increment_field(self, filter, increment, collection).await
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        StoreBackend::replace_document(self, id, expected, replacement, collection).await
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        StoreBackend::delete_documents(self, filter, collection).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        StoreBackend::list_collections(self).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> DocumentStoreResult<()> {
        StoreBackend::shutdown(*self).await
    }
}

/// Lets a runtime-selected backend stand in wherever a [`StoreBackend`] is expected.
#[async_trait]
impl StoreBackend for Box<dyn DynStoreBackend> {
    async fn insert_documents(
        &self,
        documents: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<()> {
        DynStoreBackend::insert_documents(&**self, documents, collection).await
    }

    async fn query_documents(
        &self,
        query: Query,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Bson>> {
        DynStoreBackend::query_documents(&**self, query, collection).await
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        DynStoreBackend::count_documents(&**self, query, collection).await
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        DynStoreBackend::aggregate_documents(&**self, query, collection).await
    }

    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        DynStoreBackend::update_documents(&**self, filter, changes, collection).await
    }

    fn atomic_increment(&self) -> bool {
        DynStoreBackend::atomic_increment(&**self)
    }

    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        DynStoreBackend::increment_field(&**self, filter, increment, collection).await
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        DynStoreBackend::replace_document(&**self, id, expected, replacement, collection).await
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        DynStoreBackend::delete_documents(&**self, filter, collection).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        DynStoreBackend::list_collections(&**self).await
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown_boxed().await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
