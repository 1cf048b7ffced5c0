//! Tenant-scoped declarative query layer over schemaless document stores.
//!
//! This crate is the core of the tenantlayer project and provides:
//!
//! - **Request parsing** ([`params`], [`spec`], [`filter`], [`update`]) - Turns untyped
//!   request parameters into validated query and update specifications
//! - **Tenant scoping** ([`scope`], [`tenant`]) - Confines every operation to the caller's
//!   tenant and resolves request keys to tenants
//! - **Execution** ([`plan`], [`page`]) - Chooses between aggregation, pagination,
//!   first-only and plain fetches
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query and filtering API** ([`query`]) - Filter expressions, sort keys, grouping and
//!   aggregation descriptors
//! - **Collections, channels and key-values** ([`collection`], [`channel`], [`keyvalue`])
//! - **App configs and modules** ([`named`]) - Per-tenant records addressed by name
//! - **Document store** ([`store`]) - Entry point handing out tenant-scoped views
//! - **Error handling** ([`error`]) - Error and result types
//! - **Configuration** ([`config`]) - Request limits and retry policy
//!
//! # Example
//!
//! ```ignore
//! use tenantlayer_core::{
//!     params::RequestParams, spec::QuerySpec, store::DocumentStore,
//!     tenant::{RequestContext, TenantId},
//! };
//! use serde_json::json;
//!
//! let store = DocumentStore::new(backend);
//! let ctx = RequestContext::new(TenantId::new("app-1")?);
//!
//! let params = RequestParams::from_value(json!({
//!     "q": [["done", "=", false]],
//!     "s": [["priority", "desc"], ["title", "asc"]],
//!     "p": 20,
//! }));
//! let spec = QuerySpec::parse(&params, store.config())?;
//! let page = store.collection(&ctx, "todos")?.find(spec).await?;
//! ```

pub mod backend;
pub mod channel;
pub mod collection;
pub mod config;
pub mod error;
pub mod filter;
pub mod keyvalue;
pub mod named;
pub mod page;
pub mod params;
pub mod plan;
pub mod query;
pub mod record;
pub mod scope;
pub mod spec;
pub mod store;
pub mod tenant;
pub mod update;
pub mod value;
