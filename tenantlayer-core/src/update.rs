//! Update parsing and dispatch.
//!
//! An update request is either a field operation (`op`) or a raw field map (`data`, or the
//! deprecated `d`). Field operations are closed: only `increment` and `decrement` exist.
//!
//! Operations run through the backend's native atomic increment when it has one. Otherwise
//! they fall back to optimistic compare-and-swap: read the targets, compute the new value,
//! and write each record back only if it is unchanged, retrying the records that lost a race
//! with exponential backoff.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    config::RetryPolicy,
    error::{DocumentStoreError, DocumentStoreResult},
    params::RequestParams,
    query::{Filter, Query},
    record::{self, CREATED_AT_FIELD, ID_FIELD, TENANT_FIELD, UPDATED_AT_FIELD},
    scope::ScopedFilter,
    value::{add_numeric, document_from_json, json_to_bson, negate},
};

/// Numeric field operations a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMethod {
    Increment,
    Decrement,
}

impl OperationMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "increment" => Some(OperationMethod::Increment),
            "decrement" => Some(OperationMethod::Decrement),
            _ => None,
        }
    }
}

/// A validated field operation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOperation {
    pub method: OperationMethod,
    pub field: String,
    /// The magnitude as sent by the client; [`FieldOperation::delta`] applies the sign.
    pub value: Bson,
}

impl FieldOperation {
    /// The signed amount to add to the field.
    pub fn delta(&self) -> DocumentStoreResult<Bson> {
        match self.method {
            OperationMethod::Increment => Ok(self.value.clone()),
            OperationMethod::Decrement => negate(&self.value),
        }
    }
}

/// A validated update request.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    Operation(FieldOperation),
    Raw(Document),
}

impl UpdateSpec {
    pub fn increment(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        UpdateSpec::Operation(FieldOperation {
            method: OperationMethod::Increment,
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn decrement(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        UpdateSpec::Operation(FieldOperation {
            method: OperationMethod::Decrement,
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn raw(fields: Document) -> Self {
        UpdateSpec::Raw(fields)
    }

    /// Parses the update parameters of a request.
    ///
    /// `op` wins over `data`. When both `data` and the deprecated `d` are present, `d` is
    /// ignored without a warning.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidQuery`] for unknown methods, bad values, missing
    ///   parameters or server-managed target fields.
    /// - [`DocumentStoreError::ForbiddenFilter`] for operations on the tenant field.
    /// - [`DocumentStoreError::InvalidDocument`] for a raw payload that is not an object.
    pub fn parse(params: &RequestParams) -> DocumentStoreResult<Self> {
        if let Some(op) = params.structured("op") {
            return parse_operation(&op).map(UpdateSpec::Operation);
        }

        let data = match params.structured("data") {
            Some(data) => data,
            None => match params.structured("d") {
                Some(data) => {
                    warn!("the d parameter is deprecated, send data instead");
                    data
                }
                None => {
                    return Err(DocumentStoreError::InvalidQuery(
                        "an update needs either op or data".to_string(),
                    ));
                }
            },
        };

        document_from_json(&data).map(UpdateSpec::Raw)
    }
}

/// A native increment request handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Increment {
    pub field: String,
    /// Signed amount to add.
    pub delta: Bson,
    /// Fields set alongside the increment, such as `updated_at`.
    pub touch: Document,
}

/// Outcome of an update over a target set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Records selected by the filter.
    pub matched: u64,
    /// Records actually written.
    pub modified: u64,
    /// Records that could not be written.
    pub failed: u64,
}

fn parse_operation(value: &Value) -> DocumentStoreResult<FieldOperation> {
    let map = value.as_object().ok_or_else(|| {
        DocumentStoreError::InvalidQuery("op must be an object".to_string())
    })?;

    let method = match map.get("method") {
        Some(Value::String(name)) => OperationMethod::from_name(name).ok_or_else(|| {
            DocumentStoreError::InvalidQuery(format!("unsupported operation method {name}"))
        })?,
        _ => {
            return Err(DocumentStoreError::InvalidQuery(
                "op requires a method".to_string(),
            ));
        }
    };

    let field = match map.get("field") {
        Some(Value::String(field)) if !field.is_empty() => field.clone(),
        _ => {
            return Err(DocumentStoreError::InvalidQuery(
                "op requires a field".to_string(),
            ));
        }
    };

    if field == TENANT_FIELD {
        warn!(field, "update operation targeted the tenant scoping field");
        return Err(DocumentStoreError::ForbiddenFilter(format!(
            "{TENANT_FIELD} cannot be modified"
        )));
    }
    if [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD].contains(&field.as_str()) {
        return Err(DocumentStoreError::InvalidQuery(format!(
            "{field} is managed by the server"
        )));
    }

    let value = match map.get("value") {
        None | Some(Value::Null) => Bson::Int64(1),
        Some(value @ Value::Number(_)) => json_to_bson(value),
        Some(Value::String(text)) => parse_numeric(text).ok_or_else(|| {
            DocumentStoreError::InvalidQuery(format!("op value {text} is not numeric"))
        })?,
        Some(other) => {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "op value {other} is not numeric"
            )));
        }
    };

    Ok(FieldOperation { method, field, value })
}

fn parse_numeric(text: &str) -> Option<Bson> {
    let text = text.trim();
    text.parse::<i64>()
        .map(Bson::Int64)
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|f| f.is_finite()).map(Bson::Double))
}

/// Prepares a raw payload for merging: server-managed keys are dropped and `updated_at` is
/// refreshed.
pub(crate) fn merge_changes(mut fields: Document) -> Document {
    let stripped = record::strip_protected(&mut fields);
    if !stripped.is_empty() {
        debug!(?stripped, "dropped server-managed fields from update");
    }
    fields.insert(UPDATED_AT_FIELD, record::now());
    fields
}

/// Applies an [`UpdateSpec`] to a scoped target set.
pub(crate) struct UpdateDispatcher<'a, B: StoreBackend> {
    backend: &'a B,
    collection: &'a str,
    retry: &'a RetryPolicy,
}

impl<'a, B: StoreBackend> UpdateDispatcher<'a, B> {
    pub(crate) fn new(backend: &'a B, collection: &'a str, retry: &'a RetryPolicy) -> Self {
        Self { backend, collection, retry }
    }

    pub(crate) async fn apply(
        &self,
        target: ScopedFilter,
        spec: UpdateSpec,
    ) -> DocumentStoreResult<UpdateReport> {
        match spec {
            UpdateSpec::Raw(fields) => {
                let report = self
                    .backend
                    .update_documents(target.into_expr(), merge_changes(fields), self.collection)
                    .await?;
                if report.failed > 0 {
                    warn!(
                        failed = report.failed,
                        matched = report.matched,
                        "batch update left some records unchanged"
                    );
                }
                Ok(report)
            }
            UpdateSpec::Operation(operation) => {
                let delta = operation.delta()?;
                if self.backend.atomic_increment() {
                    debug!(field = %operation.field, "applying native increment");
                    let mut touch = Document::new();
                    touch.insert(UPDATED_AT_FIELD, record::now());
                    self.backend
                        .increment_field(
                            target.into_expr(),
                            Increment { field: operation.field, delta, touch },
                            self.collection,
                        )
                        .await
                } else {
                    debug!(field = %operation.field, "applying optimistic increment");
                    self.increment_with_retry(target, &operation.field, &delta).await
                }
            }
        }
    }

    async fn increment_with_retry(
        &self,
        target: ScopedFilter,
        field: &str,
        delta: &Bson,
    ) -> DocumentStoreResult<UpdateReport> {
        let attempts = self.retry.max_attempts.max(1);
        let mut report = UpdateReport::default();
        let mut pending: Option<Vec<Bson>> = None;

        for attempt in 0..attempts {
            let filter = match &pending {
                None => target.expr().clone(),
                Some(ids) => target
                    .expr()
                    .clone()
                    .and(Filter::any_of(ID_FIELD, ids.clone())),
            };
            let records = self
                .backend
                .query_documents(Query::builder().filter(filter).build(), self.collection)
                .await?;

            if pending.is_none() {
                report.matched = records.len() as u64;
            }

            let mut conflicted = Vec::new();
            for current in records {
                let Some(id) = record::record_id(&current).map(str::to_string) else {
                    continue;
                };
                let Some(doc) = current.as_document() else {
                    continue;
                };

                let mut replacement = doc.clone();
                replacement.insert(field, add_numeric(field, doc.get(field), delta)?);
                replacement.insert(UPDATED_AT_FIELD, record::now());

                let swapped = self
                    .backend
                    .replace_document(&id, current, Bson::Document(replacement), self.collection)
                    .await?;
                if swapped {
                    report.modified += 1;
                } else {
                    conflicted.push(Bson::String(id));
                }
            }

            if conflicted.is_empty() {
                return Ok(report);
            }

            debug!(attempt, conflicts = conflicted.len(), field, "increment lost a race, retrying");
            pending = Some(conflicted);
            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        warn!(field, attempts, "optimistic increment exhausted its retry budget");
        Err(DocumentStoreError::ConcurrentUpdateConflict {
            field: field.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    fn parse(value: Value) -> DocumentStoreResult<UpdateSpec> {
        UpdateSpec::parse(&RequestParams::from_value(value))
    }

    #[test]
    fn operation_mode() {
        let spec = parse(json!({ "op": { "method": "increment", "field": "count", "value": 5 } }))
            .unwrap();
        assert_eq!(spec, UpdateSpec::increment("count", 5_i64));

        let spec = parse(json!({ "op": r#"{"method": "decrement", "field": "stock"}"# })).unwrap();
        assert_eq!(spec, UpdateSpec::decrement("stock", 1_i64));

        let spec = parse(json!({ "op": { "method": "increment", "field": "x", "value": "2.5" } }))
            .unwrap();
        assert_eq!(spec, UpdateSpec::increment("x", 2.5));
    }

    #[test]
    fn decrement_negates_the_delta() {
        let op = FieldOperation {
            method: OperationMethod::Decrement,
            field: "n".to_string(),
            value: Bson::Int64(3),
        };
        assert_eq!(op.delta().unwrap(), Bson::Int64(-3));
    }

    #[test]
    fn operation_methods_are_closed() {
        for method in ["multiply", "delete", "__call", ""] {
            let err = parse(json!({ "op": { "method": method, "field": "n" } })).unwrap_err();
            assert!(matches!(err, DocumentStoreError::InvalidQuery(_)), "{method}");
        }
    }

    #[test]
    fn operations_on_managed_fields_are_rejected() {
        let err = parse(json!({ "op": { "method": "increment", "field": "app_id" } })).unwrap_err();
        assert!(matches!(err, DocumentStoreError::ForbiddenFilter(_)));

        let err = parse(json!({ "op": { "method": "increment", "field": "_id" } })).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));

        let err = parse(json!({ "op": { "method": "increment", "field": "n", "value": "abc" } }))
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));
    }

    #[test]
    fn raw_mode_prefers_data_over_d() {
        let spec = parse(json!({ "data": { "title": "new" }, "d": { "title": "old" } })).unwrap();
        assert_eq!(spec, UpdateSpec::raw(doc! { "title": "new" }));

        let spec = parse(json!({ "d": r#"{"title": "legacy"}"# })).unwrap();
        assert_eq!(spec, UpdateSpec::raw(doc! { "title": "legacy" }));

        let err = parse(json!({ "data": [1, 2] })).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));

        let err = parse(json!({})).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));
    }

    #[test]
    fn merged_changes_drop_identity_and_touch_timestamp() {
        let changes = merge_changes(doc! { "_id": "x", "app_id": "b", "title": "t" });
        assert!(!changes.contains_key("_id"));
        assert!(!changes.contains_key("app_id"));
        assert_eq!(changes.get_str("title").unwrap(), "t");
        assert!(changes.get_datetime("updated_at").is_ok());
    }
}
