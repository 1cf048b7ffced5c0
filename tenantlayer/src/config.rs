//! Runtime configuration: which backend to run against and the request limits.
//!
//! ```ignore
//! use tenantlayer::config::Config;
//!
//! let config = Config::from_json(r#"{
//!     "backend": { "kind": "mongodb", "dsn": "mongodb://localhost:27017", "database": "apps" },
//!     "store": { "max_limit": 500 }
//! }"#)?;
//! let store = config.build().await?;
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use tenantlayer_core::{
    backend::{DynStoreBackend, StoreBackendBuilder},
    config::StoreConfig,
    error::DocumentStoreResult,
    store::{DocumentStore, DynDocumentStore},
};
use tenantlayer_memory::InMemoryStore;

/// The storage engine behind a [`DynDocumentStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local storage, lost on restart.
    #[default]
    Memory,
    /// A MongoDB database. Requires the `mongodb` feature.
    #[cfg(feature = "mongodb")]
    #[serde(rename = "mongodb")]
    MongoDb {
        dsn: String,
        database: String,
    },
}

/// Top-level configuration. Every section is optional in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`tenantlayer_core::error::DocumentStoreError::Serialization`] for malformed
    /// JSON or an unknown backend kind.
    pub fn from_json(text: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Connects the configured backend and wraps it in a document store.
    ///
    /// # Errors
    ///
    /// Returns [`tenantlayer_core::error::DocumentStoreError::Initialization`] if the
    /// backend cannot be set up.
    pub async fn build(&self) -> DocumentStoreResult<DynDocumentStore> {
        let backend: Box<dyn DynStoreBackend> = match &self.backend {
            BackendConfig::Memory => Box::new(InMemoryStore::builder().build().await?),
            #[cfg(feature = "mongodb")]
            BackendConfig::MongoDb { dsn, database } => Box::new(
                tenantlayer_mongodb::MongoDbStore::builder(dsn, database)
                    .build()
                    .await?,
            ),
        };

        info!(backend = ?self.backend, "document store ready");

        Ok(DocumentStore::with_config(backend, self.store.clone()))
    }
}
