//! Convenient re-exports of commonly used types from tenantlayer.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use tenantlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - The document store, its tenant-scoped views and request outcomes
//! - Request parameters and the query and update specifications parsed from them
//! - Tenant identity and key resolution
//! - Store backends and builders
//! - Query construction and filtering
//! - Error types
//!
//! Only [`StoreBackend`] is exported of the backend traits, so backend methods resolve
//! without ambiguity on concrete backends. Import
//! [`DynStoreBackend`](crate::backend::DynStoreBackend) explicitly when boxing one.

pub use tenantlayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    channel::Channel,
    collection::TenantCollection,
    config::{RetryPolicy, StoreConfig},
    error::{DocumentStoreError, DocumentStoreResult},
    keyvalue::KeyValues,
    named::NamedRecords,
    page::{Page, PaginationParams},
    params::RequestParams,
    plan::QueryOutcome,
    query::{Aggregate, AggregateMethod, Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    spec::QuerySpec,
    store::{DocumentStore, DynDocumentStore},
    tenant::{IdentityResolver, KeyRegistry, RequestContext, TenantDirectory, TenantId},
    update::{UpdateReport, UpdateSpec},
};
