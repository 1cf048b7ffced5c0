//! Per-tenant records addressed by name.
//!
//! App configs and modules are both kept this way: each is a free-form record with a
//! required `name`, stored in its own reserved collection. Writing a name that already
//! exists merges the new fields into the existing record.

use bson::{Bson, Document};
use tracing::{debug, instrument};

use crate::{
    backend::StoreBackend,
    collection::TenantCollection,
    error::{DocumentStoreError, DocumentStoreResult},
    keyvalue::NAME_FIELD,
    query::{Filter, Query, QueryBuilder, SortDirection},
    record::{CREATED_AT_FIELD, ID_FIELD},
    update::UpdateSpec,
};

/// The named records of one tenant in one reserved collection.
#[derive(Debug)]
pub struct NamedRecords<'a, B: StoreBackend> {
    records: TenantCollection<'a, B>,
}

impl<'a, B: StoreBackend> NamedRecords<'a, B> {
    pub(crate) fn new(records: TenantCollection<'a, B>) -> Self {
        Self { records }
    }

    /// All records, oldest first.
    #[instrument(skip_all, fields(tenant = %self.records.context().tenant(), request_id = %self.records.context().request_id(), collection = %self.records.name()))]
    pub async fn list(&self) -> DocumentStoreResult<Vec<Bson>> {
        self.records.query(by_age(None).build()).await
    }

    /// The record stored under `name`, if any.
    pub async fn get(&self, name: &str) -> DocumentStoreResult<Option<Bson>> {
        let query = by_age(Some(name)).limit(1).build();
        Ok(self.records.query(query).await?.into_iter().next())
    }

    /// Creates the record, or merges its fields into the existing record of the same name.
    ///
    /// Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the record has no non-blank
    /// string `name`.
    #[instrument(skip_all, fields(tenant = %self.records.context().tenant(), request_id = %self.records.context().request_id(), collection = %self.records.name()))]
    pub async fn put(&self, record: Document) -> DocumentStoreResult<Bson> {
        let name = match record.get(NAME_FIELD) {
            Some(Bson::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => {
                return Err(DocumentStoreError::InvalidDocument(
                    "a named record needs a non-empty string name".to_string(),
                ));
            }
        };

        let Some(existing) = self.get(&name).await? else {
            debug!(name = %name, "creating named record");
            return self.records.create(record).await;
        };

        let id = existing
            .as_document()
            .and_then(|doc| doc.get_str(ID_FIELD).ok())
            .ok_or_else(|| {
                DocumentStoreError::InvalidDocument(format!("stored record {name} has no id"))
            })?
            .to_string();

        debug!(name = %name, id = %id, "replacing named record");
        self.records.update_by_id(&id, UpdateSpec::raw(record)).await
    }

    /// Puts each record in order. Stops at the first failure.
    pub async fn put_all(&self, records: Vec<Document>) -> DocumentStoreResult<Vec<Bson>> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.put(record).await?);
        }
        Ok(stored)
    }

    /// Deletes every record named `name` and returns how many were removed.
    #[instrument(skip_all, fields(tenant = %self.records.context().tenant(), request_id = %self.records.context().request_id(), collection = %self.records.name(), name = %name))]
    pub async fn remove(&self, name: &str) -> DocumentStoreResult<u64> {
        self.records.delete(Some(Filter::eq(NAME_FIELD, name))).await
    }
}

fn by_age(name: Option<&str>) -> QueryBuilder {
    let builder = Query::builder().sort(CREATED_AT_FIELD, SortDirection::Asc);
    match name {
        Some(name) => builder.filter(Filter::eq(NAME_FIELD, name)),
        None => builder,
    }
}
