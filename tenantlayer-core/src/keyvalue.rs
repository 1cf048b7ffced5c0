//! Per-tenant key-value entries.
//!
//! Entries are records `{name, value}` in a reserved collection. Reading a missing name
//! yields null; writing upserts.

use bson::{Bson, Document};
use tracing::instrument;

use crate::{
    backend::StoreBackend,
    collection::TenantCollection,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Filter, Query, SortDirection},
    record::CREATED_AT_FIELD,
    update::UpdateSpec,
};

pub const NAME_FIELD: &str = "name";
pub const VALUE_FIELD: &str = "value";

/// The key-value entries of one tenant.
#[derive(Debug)]
pub struct KeyValues<'a, B: StoreBackend> {
    entries: TenantCollection<'a, B>,
}

impl<'a, B: StoreBackend> KeyValues<'a, B> {
    pub(crate) fn new(entries: TenantCollection<'a, B>) -> Self {
        Self { entries }
    }

    /// Returns the value stored under `name`, or null.
    #[instrument(skip_all, fields(tenant = %self.entries.context().tenant(), request_id = %self.entries.context().request_id(), name = %name))]
    pub async fn get(&self, name: &str) -> DocumentStoreResult<Bson> {
        Ok(self
            .entry(name)
            .await?
            .and_then(|entry| entry.as_document().and_then(|doc| doc.get(VALUE_FIELD)).cloned())
            .unwrap_or(Bson::Null))
    }

    /// Stores `value` under `name`, replacing any previous value, and returns the entry.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] for a blank name.
    #[instrument(skip_all, fields(tenant = %self.entries.context().tenant(), request_id = %self.entries.context().request_id(), name = %name))]
    pub async fn set(&self, name: &str, value: Bson) -> DocumentStoreResult<Bson> {
        if name.trim().is_empty() {
            return Err(DocumentStoreError::InvalidQuery(
                "key names must not be empty".to_string(),
            ));
        }

        let mut changes = Document::new();
        changes.insert(VALUE_FIELD, value.clone());

        let report = self
            .entries
            .update(Some(Filter::eq(NAME_FIELD, name)), UpdateSpec::raw(changes))
            .await?;

        if report.matched == 0 {
            let mut entry = Document::new();
            entry.insert(NAME_FIELD, name);
            entry.insert(VALUE_FIELD, value);
            return self.entries.create(entry).await;
        }

        self.entry(name).await?.ok_or_else(|| {
            DocumentStoreError::DocumentNotFound(name.to_string(), self.entries.name().to_string())
        })
    }

    async fn entry(&self, name: &str) -> DocumentStoreResult<Option<Bson>> {
        let query = Query::builder()
            .filter(Filter::eq(NAME_FIELD, name))
            .sort(CREATED_AT_FIELD, SortDirection::Asc)
            .limit(1)
            .build();

        Ok(self.entries.query(query).await?.into_iter().next())
    }
}
