//! Main tenantlayer crate providing a tenant-scoped document API.
//!
//! This crate is the primary entry point for users of the tenantlayer framework.
//! It re-exports the core types and functionality from the sub-crates, selects a storage
//! backend from configuration and routes decoded requests to the store.
//!
//! # Features
//!
//! - **Tenant isolation** - Every read, write, update, delete and aggregate is confined to
//!   the requesting tenant, whatever the client sends
//! - **Declarative queries** - Filters, multi-key sorts, grouping, pagination and
//!   aggregation described by request parameters
//! - **Atomic field operations** - Increments and decrements that never lose updates
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use tenantlayer::{prelude::*, memory::InMemoryStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let registry = KeyRegistry::new();
//!     let (tenant, _key) = registry.provision("todo-app").await?;
//!     let ctx = RequestContext::new(tenant.id);
//!
//!     let todos = store.collection(&ctx, "todos")?;
//!     todos.create(bson::doc! { "title": "write docs", "priority": 2 }).await?;
//!
//!     let params = RequestParams::from_value(json!({
//!         "q": [["priority", ">=", 1]],
//!         "s": [["priority", "desc"]],
//!         "p": 20,
//!     }));
//!     let page = todos.find(QuerySpec::parse(&params, store.config())?).await?;
//!     println!("{}", page.into_json());
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Serving requests
//!
//! [`api::Api`] maps the route surface (`/collection/:name`, `/channels/:path+`,
//! `/key/:name`, ...) onto a store without doing any HTTP parsing itself:
//!
//! ```ignore
//! use tenantlayer::{api::{Api, ApiRequest, Method}, config::Config, prelude::*};
//!
//! let store = Config::from_json(r#"{ "backend": { "kind": "memory" } }"#)?.build().await?;
//! let api = Api::new(store, KeyRegistry::new());
//!
//! let response = api
//!     .handle(ApiRequest::new(Method::Get, "/collection/todos").with_key(key))
//!     .await;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod api;
pub mod config;
pub mod prelude;

pub use tenantlayer_core::{
    backend, channel, collection, error, filter, keyvalue, named, page, params, plan, query,
    record, scope, spec, store, tenant, update, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use tenantlayer_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use tenantlayer_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
