//! In-memory document storage backend for tenantlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Full query support** - Filtering, stable multi-key sorting, grouping and windows
//! - **Aggregation** - count, max, min, avg and sum, optionally per group
//! - **Atomic increments** - Numeric increments run under the write lock
//!
//! # Quick Start
//!
//! ```ignore
//! use tenantlayer::{DocumentStore, memory::InMemoryStore};
//! use tenantlayer::tenant::{RequestContext, TenantId};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let ctx = RequestContext::new(TenantId::new("app-1")?);
//!
//!     store.collection(&ctx, "todos")?.create(doc! { "title": "write docs" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as tenantlayer_memory;

pub mod store;
mod evaluator;
mod grouping;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
