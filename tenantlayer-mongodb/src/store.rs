use async_trait::async_trait;
use futures::{stream::iter, StreamExt, TryStreamExt};
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions},
};
use tracing::{debug, instrument};

use tenantlayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{AggregateMethod, AggregateQuery, AggregateRow, Expr, Query},
    record::ID_FIELD,
    update::{Increment, UpdateReport},
};

use crate::{
    query::{MongoQueryTranslator, accumulator, group_id, group_slot, sort_document},
    sanitizer::ValueSanitizer,
};

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;
/// Server error code for `$inc` on a non-numeric field.
const TYPE_MISMATCH: i32 = 14;

fn backend_error(error: MongoError) -> DocumentStoreError {
    DocumentStoreError::Backend(error.to_string())
}

fn write_error_code(error: &MongoError) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => Some(failure.code),
        _ => None,
    }
}

/// Widens 32-bit integers so both backends report counts and integer sums as `Int64`.
fn widen(value: Bson) -> Bson {
    match value {
        Bson::Int32(value) => Bson::Int64(i64::from(value)),
        other => other,
    }
}


/// MongoDB storage backend.
///
/// Stored keys are sanitized (see [`ValueSanitizer`]); the `_id` of a record is the
/// tenantlayer record id string. Increments use `$inc`, so
/// [`StoreBackend::atomic_increment`] is `true`.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(&ValueSanitizer::sanitize_string(collection_name))
    }

    fn restore_document(&self, document: &Document) -> Bson {
        Bson::Document(ValueSanitizer::restore_document(document))
    }

    async fn run_pipeline(
        &self,
        pipeline: Vec<Document>,
        collection: &str,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    /// Ids of the documents matching `filter`.
    async fn matching_ids(&self, filter: Document, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        let mut options = FindOptions::default();
        options.projection = Some(doc! { ID_FIELD: 1 });

        Ok(
            self.get_collection(collection)
                .find(filter)
                .with_options(options)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?
                .into_iter()
                .filter_map(|doc| doc.get(ID_FIELD).cloned())
                .collect()
        )
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    #[instrument(skip_all, fields(collection = %collection))]
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocumentStoreResult<()> {
        let target = self.get_collection(collection);

        iter(documents)
            .then(async |document| {
                let id = document.get_str(ID_FIELD).unwrap_or_default().to_string();
                target
                    .insert_one(ValueSanitizer::sanitize_document(&document))
                    .await
                    .map_err(|e| match write_error_code(&e) {
                        Some(DUPLICATE_KEY) => {
                            DocumentStoreError::DocumentAlreadyExists(id, collection.to_string())
                        }
                        _ => backend_error(e),
                    })
            })
            .try_collect::<Vec<_>>()
            .await?;

        Ok(())
    }

    async fn query_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Bson>> {
        let filter = MongoQueryTranslator::translate(query.filter.as_ref())?;
        let sort = sort_document(&query.sort);

        let documents = if query.group_by.is_empty() {
            let mut options = FindOptions::default();
            options.sort = Some(sort);
            options.skip = query.offset.map(|skip| skip as u64);
            options.limit = query.limit.map(|limit| limit as i64);

            self.get_collection(collection)
                .find(filter)
                .with_options(options)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?
        } else {
            // Keep the first document per group in sort order, then restore that order
            let mut pipeline = vec![
                doc! { "$match": filter },
                doc! { "$sort": sort.clone() },
                doc! { "$group": { "_id": group_id(&query.group_by), "first": { "$first": "$$ROOT" } } },
                doc! { "$replaceRoot": { "newRoot": "$first" } },
                doc! { "$sort": sort },
            ];
            if let Some(offset) = query.offset {
                pipeline.push(doc! { "$skip": offset as i64 });
            }
            if let Some(limit) = query.limit {
                pipeline.push(doc! { "$limit": limit as i64 });
            }

            self.run_pipeline(pipeline, collection).await?
        };

        Ok(
            documents
                .iter()
                .map(|doc| self.restore_document(doc))
                .collect()
        )
    }

    async fn count_documents(&self, query: Query, collection: &str) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::translate(query.filter.as_ref())?;

        if query.group_by.is_empty() {
            return self
                .get_collection(collection)
                .count_documents(filter)
                .await
                .map_err(backend_error);
        }

        let counted = self
            .run_pipeline(
                vec![
                    doc! { "$match": filter },
                    doc! { "$group": { "_id": group_id(&query.group_by) } },
                    doc! { "$count": "groups" },
                ],
                collection,
            )
            .await?;

        Ok(counted
            .first()
            .and_then(|doc| doc.get("groups").cloned())
            .and_then(|groups| match widen(groups) {
                Bson::Int64(groups) => u64::try_from(groups).ok(),
                _ => None,
            })
            .unwrap_or(0))
    }

    async fn aggregate_documents(
        &self,
        query: AggregateQuery,
        collection: &str,
    ) -> DocumentStoreResult<Vec<AggregateRow>> {
        let filter = MongoQueryTranslator::translate(query.filter.as_ref())?;
        let rows = self
            .run_pipeline(
                vec![
                    doc! { "$match": filter },
                    doc! { "$group": {
                        "_id": group_id(&query.group_by),
                        "value": accumulator(&query.aggregate),
                    } },
                    doc! { "$sort": { "_id": 1 } },
                ],
                collection,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let key = row.get_document("_id").ok();
                let group = query
                    .group_by
                    .iter()
                    .enumerate()
                    .map(|(index, field)| {
                        let value = key
                            .and_then(|key| key.get(group_slot(index)))
                            .map(ValueSanitizer::restore_value)
                            .unwrap_or(Bson::Null);
                        (field.clone(), value)
                    })
                    .collect::<Document>();

                let value = row.get("value").cloned().unwrap_or(Bson::Null);
                let value = match query.aggregate.method {
                    AggregateMethod::Count | AggregateMethod::Sum => widen(value),
                    _ => ValueSanitizer::restore_value(&value),
                };

                AggregateRow { group, value }
            })
            .collect())
    }

    #[instrument(skip_all, fields(collection = %collection))]
    async fn update_documents(
        &self,
        filter: Expr,
        changes: Document,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        let ids = self
            .matching_ids(MongoQueryTranslator::translate(Some(&filter))?, collection)
            .await?;
        let changes = ValueSanitizer::sanitize_document(&changes);
        let target = self.get_collection(collection);

        let outcomes = iter(ids)
            .then(async |id| {
                target
                    .update_one(doc! { ID_FIELD: id.clone() }, doc! { "$set": changes.clone() })
                    .await
                    .map_err(|e| (id, e))
            })
            .collect::<Vec<_>>()
            .await;

        let mut report = UpdateReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    report.matched += result.matched_count;
                    report.modified += result.matched_count;
                }
                Err((id, error)) => {
                    debug!(%id, %error, "record update failed");
                    report.matched += 1;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn atomic_increment(&self) -> bool {
        true
    }

    async fn increment_field(
        &self,
        filter: Expr,
        increment: Increment,
        collection: &str,
    ) -> DocumentStoreResult<UpdateReport> {
        let field = ValueSanitizer::sanitize_path(&increment.field);
        let result = self
            .get_collection(collection)
            .update_many(
                MongoQueryTranslator::translate(Some(&filter))?,
                doc! {
                    "$inc": { field: increment.delta },
                    "$set": ValueSanitizer::sanitize_document(&increment.touch),
                },
            )
            .await
            .map_err(|e| match write_error_code(&e) {
                Some(TYPE_MISMATCH) => DocumentStoreError::InvalidDocument(format!(
                    "field {} holds a non-numeric value and cannot be incremented",
                    increment.field
                )),
                _ => backend_error(e),
            })?;

        Ok(UpdateReport {
            matched: result.matched_count,
            modified: result.modified_count,
            failed: 0,
        })
    }

    async fn replace_document(
        &self,
        id: &str,
        expected: Bson,
        replacement: Bson,
        collection: &str,
    ) -> DocumentStoreResult<bool> {
        let (Bson::Document(expected), Bson::Document(replacement)) = (expected, replacement) else {
            return Err(DocumentStoreError::InvalidDocument(
                "compare-and-swap requires documents".to_string(),
            ));
        };

        let result = self
            .get_collection(collection)
            .replace_one(
                doc! {
                    ID_FIELD: id,
                    "$expr": { "$eq": [
                        "$$ROOT",
                        { "$literal": ValueSanitizer::sanitize_document(&expected) },
                    ] },
                },
                ValueSanitizer::sanitize_document(&replacement),
            )
            .await
            .map_err(backend_error)?;

        Ok(result.matched_count == 1)
    }

    async fn delete_documents(&self, filter: Expr, collection: &str) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator::translate(Some(&filter))?)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)?
            .into_iter()
            .map(|name| ValueSanitizer::restore_string(&name))
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        debug!(database = %self.database, "connecting to mongodb");

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
