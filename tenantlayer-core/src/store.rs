//! Main document store interface.
//!
//! [`DocumentStore`] owns a backend and the [`StoreConfig`] limits, and hands out
//! tenant-scoped views: collections, channels, key-values, configs and modules. Each view
//! is bound to the [`RequestContext`] of one request.
//!
//! # Example
//!
//! ```ignore
//! use tenantlayer::store::DocumentStore;
//! use tenantlayer::tenant::{RequestContext, TenantId};
//!
//! let store = DocumentStore::new(backend);
//! let ctx = RequestContext::new(TenantId::new("app-1")?);
//! let todos = store.collection(&ctx, "todos")?;
//! ```

use tracing::{info, instrument};

use crate::{
    backend::StoreBackend,
    channel::{Channel, channel_path},
    collection::TenantCollection,
    config::StoreConfig,
    error::DocumentStoreResult,
    keyvalue::KeyValues,
    named::NamedRecords,
    record::{
        CHANNEL_COLLECTION, CONFIG_COLLECTION, KEY_VALUE_COLLECTION, MODULE_COLLECTION,
        validate_collection_name,
    },
    scope::TenantScope,
    tenant::{RequestContext, TenantId},
};

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    config: StoreConfig,
}

/// A document store over a backend chosen at runtime.
pub type DynDocumentStore = DocumentStore<Box<dyn crate::backend::DynStoreBackend>>;

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend and default limits.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    pub fn with_config(backend: B, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets a collection as seen by the caller of `ctx`.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The authenticated request context
    /// * `name` - The name of the collection
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DocumentStoreError::InvalidQuery`] for malformed or reserved
    /// collection names.
    pub fn collection<'a>(
        &'a self,
        ctx: &RequestContext,
        name: &str,
    ) -> DocumentStoreResult<TenantCollection<'a, B>> {
        validate_collection_name(name)?;
        Ok(TenantCollection::new(name.to_string(), &self.backend, &self.config, ctx))
    }

    /// Gets a channel by its `/`-separated path. Leading and trailing slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DocumentStoreError::InvalidQuery`] if the path has blank
    /// segments.
    pub fn channel<'a>(&'a self, ctx: &RequestContext, path: &str) -> DocumentStoreResult<Channel<'a, B>> {
        let path = channel_path(path.trim_matches('/').split('/'))?;
        Ok(Channel::new(
            path,
            TenantCollection::new(CHANNEL_COLLECTION.to_string(), &self.backend, &self.config, ctx),
        ))
    }

    /// Gets the key-value entries of the caller of `ctx`.
    pub fn keys<'a>(&'a self, ctx: &RequestContext) -> KeyValues<'a, B> {
        KeyValues::new(TenantCollection::new(
            KEY_VALUE_COLLECTION.to_string(),
            &self.backend,
            &self.config,
            ctx,
        ))
    }

    /// Gets the named app configs of the caller of `ctx`.
    pub fn configs<'a>(&'a self, ctx: &RequestContext) -> NamedRecords<'a, B> {
        self.named(ctx, CONFIG_COLLECTION)
    }

    /// Gets the named app modules of the caller of `ctx`.
    pub fn modules<'a>(&'a self, ctx: &RequestContext) -> NamedRecords<'a, B> {
        self.named(ctx, MODULE_COLLECTION)
    }

    fn named<'a>(&'a self, ctx: &RequestContext, collection: &str) -> NamedRecords<'a, B> {
        NamedRecords::new(TenantCollection::new(
            collection.to_string(),
            &self.backend,
            &self.config,
            ctx,
        ))
    }

    /// Deletes every record, message and entry owned by `tenant`.
    ///
    /// Returns the number of records removed across all collections.
    #[instrument(skip_all, fields(tenant = %tenant))]
    pub async fn purge_tenant(&self, tenant: &TenantId) -> DocumentStoreResult<u64> {
        let scope = TenantScope::new(&RequestContext::new(tenant.clone()));
        let mut removed = 0;

        for collection in self.backend.list_collections().await? {
            removed += self
                .backend
                .delete_documents(scope.filter(None)?.into_expr(), &collection)
                .await?;
        }

        info!(removed, "purged tenant records");
        Ok(removed)
    }

    /// Lists all collections in the store, including reserved ones.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_collections().await
    }

    /// Shuts down the store and releases backend resources.
    ///
    /// This consumes the store and should be called when no longer needed.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}
