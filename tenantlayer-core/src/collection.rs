//! Tenant-scoped collections.
//!
//! A [`TenantCollection`] is the only way to reach a backend with a collection name. Every
//! method confines its target set to the caller's tenant before the backend sees it.
//!
//! # Example
//!
//! ```ignore
//! use tenantlayer::{DocumentStore, memory::InMemoryStore};
//! use tenantlayer::tenant::{RequestContext, TenantId};
//! use tenantlayer::spec::QuerySpec;
//! use bson::doc;
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let ctx = RequestContext::new(TenantId::new("app-1")?);
//!
//! let todos = store.collection(&ctx, "todos")?;
//! todos.create(doc! { "title": "a" }).await?;
//! let outcome = todos.find(QuerySpec::new()).await?;
//! ```

use bson::{Bson, Document};
use tracing::{debug, instrument};

use crate::{
    backend::StoreBackend,
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    plan::{ExecutionPlan, QueryOutcome},
    query::{Expr, Query},
    record::ID_FIELD,
    scope::TenantScope,
    spec::QuerySpec,
    tenant::RequestContext,
    update::{UpdateDispatcher, UpdateReport, UpdateSpec},
};

/// One collection as seen by one tenant.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the store this collection was taken from
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct TenantCollection<'a, B: StoreBackend> {
    name: String,
    backend: &'a B,
    config: &'a StoreConfig,
    ctx: RequestContext,
    scope: TenantScope,
}

impl<'a, B: StoreBackend> TenantCollection<'a, B> {
    /// Creates a collection handle without validating the name (internal use).
    pub(crate) fn new(
        name: String,
        backend: &'a B,
        config: &'a StoreConfig,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            name,
            backend,
            config,
            scope: TenantScope::new(ctx),
            ctx: ctx.clone(),
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Runs a read request.
    ///
    /// A collection that has never been written is read as empty.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field,
    /// or a backend error.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name))]
    pub async fn find(&self, spec: QuerySpec) -> DocumentStoreResult<QueryOutcome> {
        let plan = ExecutionPlan::from_spec(spec, &self.scope)?;
        debug!(plan = plan.kind(), "executing read");
        plan.execute(self.backend, &self.name).await
    }

    /// Fetches one record by id.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if the tenant has no such record.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name, id = %id))]
    pub async fn find_by_id(&self, id: &str) -> DocumentStoreResult<Bson> {
        let query = Query {
            filter: Some(self.scope.by_id(id).into_expr()),
            limit: Some(1),
            ..Query::default()
        };

        self.backend
            .query_documents(query, &self.name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(id))
    }

    /// Creates a record from a client payload and returns the stored record.
    ///
    /// Client-supplied `_id`, `app_id` and `created_at` are replaced by server values.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name))]
    pub async fn create(&self, payload: Document) -> DocumentStoreResult<Bson> {
        let record = self.scope.stamp(payload);
        self.backend
            .insert_documents(vec![record.clone()], &self.name)
            .await?;

        debug!(id = record.get_str(ID_FIELD).unwrap_or_default(), "created record");

        Ok(Bson::Document(record))
    }

    /// Applies an update to every record matching `filter`.
    ///
    /// Raw updates are best-effort across records; the report counts failures.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    /// - [`DocumentStoreError::ConcurrentUpdateConflict`] if an optimistic increment ran out
    ///   of retries.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name))]
    pub async fn update(
        &self,
        filter: Option<Expr>,
        update: UpdateSpec,
    ) -> DocumentStoreResult<UpdateReport> {
        let target = self.scope.filter(filter)?;
        self.dispatcher().apply(target, update).await
    }

    /// Applies an update to one record and returns the record as stored afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if the tenant has no such record.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name, id = %id))]
    pub async fn update_by_id(&self, id: &str, update: UpdateSpec) -> DocumentStoreResult<Bson> {
        let report = self.dispatcher().apply(self.scope.by_id(id), update).await?;
        if report.matched == 0 {
            return Err(self.not_found(id));
        }

        self.find_by_id(id).await
    }

    /// Deletes every record matching `filter` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name))]
    pub async fn delete(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let target = self.scope.filter(filter)?;
        let deleted = self
            .backend
            .delete_documents(target.into_expr(), &self.name)
            .await?;

        debug!(deleted, "deleted records");
        Ok(deleted)
    }

    /// Deletes one record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DocumentNotFound`] if the tenant has no such record.
    #[instrument(skip_all, fields(tenant = %self.ctx.tenant(), request_id = %self.ctx.request_id(), collection = %self.name, id = %id))]
    pub async fn delete_by_id(&self, id: &str) -> DocumentStoreResult<()> {
        let deleted = self
            .backend
            .delete_documents(self.scope.by_id(id).into_expr(), &self.name)
            .await?;

        if deleted == 0 {
            return Err(self.not_found(id));
        }
        Ok(())
    }

    /// Runs a scoped query directly (internal use by channels and key-values).
    pub(crate) async fn query(&self, query: Query) -> DocumentStoreResult<Vec<Bson>> {
        let scoped = self.scope.query(query)?;
        self.backend
            .query_documents(scoped.into_query(), &self.name)
            .await
    }

    fn dispatcher(&self) -> UpdateDispatcher<'_, B> {
        UpdateDispatcher::new(self.backend, &self.name, &self.config.retry)
    }

    fn not_found(&self, id: &str) -> DocumentStoreError {
        DocumentStoreError::DocumentNotFound(id.to_string(), self.name.clone())
    }
}
