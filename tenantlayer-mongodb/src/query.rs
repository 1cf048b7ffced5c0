//! Query translation from tenantlayer's AST to MongoDB query syntax.
//!
//! This module translates filter expressions, sort keys, group-by lists and aggregation
//! descriptors into the BSON documents MongoDB's find and aggregation commands expect.

use bson::{Bson, Document, doc};

use tenantlayer_core::{
    error::DocumentStoreError,
    query::{Aggregate, AggregateMethod, Expr, FieldOp, QueryVisitor, Sort, SortDirection},
    record::{CREATED_AT_FIELD, ID_FIELD},
};

use crate::sanitizer::ValueSanitizer;


/// Translates tenantlayer query expressions into MongoDB query documents.
///
/// This struct implements the [`QueryVisitor`] trait to convert abstract query expressions
/// into MongoDB's native BSON query syntax. Field paths are key-sanitized the same way
/// stored documents are, and string patterns are matched literally and case-sensitively.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter, where no filter matches everything.
    pub(crate) fn translate(filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<Vec<Document>, DocumentStoreError> {
        exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect()
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! { "$and": self.visit_all(exprs)? })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            // An empty disjunction matches nothing
            return Ok(doc! { "$nor": [{}] });
        }

        Ok(doc! { "$or": self.visit_all(exprs)? })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": [self.visit_expr(expr)?] })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            ValueSanitizer::sanitize_path(field): { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let value = ValueSanitizer::sanitize_value(value);

        let condition = match op {
            FieldOp::Eq => doc! { "$eq": value },
            FieldOp::Ne => doc! { "$ne": value },
            FieldOp::Gt => doc! { "$gt": value },
            FieldOp::Gte => doc! { "$gte": value },
            FieldOp::Lt => doc! { "$lt": value },
            FieldOp::Lte => doc! { "$lte": value },
            FieldOp::Contains => contains(value),
            // $not also selects documents lacking the field
            FieldOp::NotContains => doc! { "$not": contains(value) },
            FieldOp::StartsWith => match value {
                Bson::String(s) => doc! { "$regex": format!("^{}", regex::escape(&s)) },
                _ => return Err(DocumentStoreError::InvalidQuery(
                    "starts_with requires a string value".to_string(),
                )),
            },
            FieldOp::EndsWith => match value {
                Bson::String(s) => doc! { "$regex": format!("{}$", regex::escape(&s)) },
                _ => return Err(DocumentStoreError::InvalidQuery(
                    "ends_with requires a string value".to_string(),
                )),
            },
            FieldOp::AnyOf => doc! { "$in": as_set(value) },
            FieldOp::NoneOf => doc! { "$nin": as_set(value) },
        };

        Ok(doc! { ValueSanitizer::sanitize_path(field): condition })
    }
}

fn contains(value: Bson) -> Document {
    match value {
        Bson::String(s) => doc! { "$regex": regex::escape(&s) },
        other => doc! { "$elemMatch": { "$eq": other } },
    }
}

fn as_set(value: Bson) -> Bson {
    match value {
        Bson::Array(_) => value,
        single => Bson::Array(vec![single]),
    }
}

/// Builds a `$sort` document. Creation time and id are appended as final tie-breakers so
/// equal keys come back in insertion order on every run.
pub(crate) fn sort_document(keys: &[Sort]) -> Document {
    let mut sort = Document::new();
    for key in keys {
        sort.insert(
            ValueSanitizer::sanitize_path(&key.field),
            match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            },
        );
    }

    for tie_breaker in [CREATED_AT_FIELD, ID_FIELD] {
        if !sort.contains_key(tie_breaker) {
            sort.insert(tie_breaker, 1);
        }
    }

    sort
}

/// Name of the `index`-th group key inside a `$group` `_id`.
pub(crate) fn group_slot(index: usize) -> String {
    format!("k{index}")
}

/// Builds the `_id` expression of a `$group` stage. Missing fields group with nulls.
pub(crate) fn group_id(fields: &[String]) -> Bson {
    if fields.is_empty() {
        return Bson::Null;
    }

    Bson::Document(
        fields
            .iter()
            .enumerate()
            .map(|(index, field)| {
                (
                    group_slot(index),
                    Bson::Document(doc! {
                        "$ifNull": [format!("${}", ValueSanitizer::sanitize_path(field)), Bson::Null]
                    }),
                )
            })
            .collect(),
    )
}

/// Builds the accumulator computing `aggregate` inside a `$group` stage.
pub(crate) fn accumulator(aggregate: &Aggregate) -> Document {
    let operand = |field: &Option<String>| match field {
        Some(field) => Bson::String(format!("${}", ValueSanitizer::sanitize_path(field))),
        None => Bson::Null,
    };

    match aggregate.method {
        AggregateMethod::Count => doc! { "$sum": 1 },
        AggregateMethod::Sum => doc! { "$sum": operand(&aggregate.field) },
        AggregateMethod::Avg => doc! { "$avg": operand(&aggregate.field) },
        AggregateMethod::Max => doc! { "$max": operand(&aggregate.field) },
        AggregateMethod::Min => doc! { "$min": operand(&aggregate.field) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantlayer_core::query::Filter;

    fn translate(expr: Expr) -> Document {
        MongoQueryTranslator::translate(Some(&expr)).unwrap()
    }

    #[test]
    fn comparisons() {
        assert_eq!(translate(Filter::eq("a", 1)), doc! { "a": { "$eq": 1 } });
        assert_eq!(translate(Filter::gte("n", 2.5)), doc! { "n": { "$gte": 2.5 } });
        assert_eq!(
            translate(Filter::any_of("s", vec![Bson::from("x")])),
            doc! { "s": { "$in": ["x"] } }
        );
        assert_eq!(translate(Filter::none_of("s", "x")), doc! { "s": { "$nin": ["x"] } });
    }

    #[test]
    fn combinators() {
        let expr = Filter::and([Filter::eq("app_id", "t"), Filter::eq("a", 1).not()]);
        assert_eq!(
            translate(expr),
            doc! { "$and": [
                { "app_id": { "$eq": "t" } },
                { "$nor": [{ "a": { "$eq": 1 } }] },
            ] }
        );
        assert_eq!(MongoQueryTranslator::translate(None).unwrap(), doc! {});
    }

    #[test]
    fn patterns_are_literal() {
        assert_eq!(
            translate(Filter::starts_with("email", "a.b+")),
            doc! { "email": { "$regex": "^a\\.b\\+" } }
        );
        assert_eq!(
            translate(Filter::ends_with("path", "(1)$")),
            doc! { "path": { "$regex": "\\(1\\)\\$$" } }
        );
        assert_eq!(
            translate(Filter::not_contains("title", "x")),
            doc! { "title": { "$not": { "$regex": "x" } } }
        );
        assert_eq!(
            translate(Filter::contains("tags", 3)),
            doc! { "tags": { "$elemMatch": { "$eq": 3 } } }
        );
        assert!(MongoQueryTranslator::translate(Some(&Filter::ends_with("n", 1))).is_err());
    }

    #[test]
    fn field_paths_are_sanitized() {
        assert_eq!(
            translate(Filter::exists("cost$.usd")),
            doc! { "cost__dollar__.usd": { "$exists": true } }
        );
    }

    #[test]
    fn sort_appends_tie_breakers() {
        let sort = sort_document(&[Sort::desc("priority")]);
        assert_eq!(sort, doc! { "priority": -1, "created_at": 1, "_id": 1 });

        let sort = sort_document(&[Sort::desc("created_at")]);
        assert_eq!(sort, doc! { "created_at": -1, "_id": 1 });
    }

    #[test]
    fn group_stages() {
        assert_eq!(group_id(&[]), Bson::Null);
        assert_eq!(
            group_id(&["status".to_string()]),
            Bson::Document(doc! { "k0": { "$ifNull": ["$status", null] } })
        );
        assert_eq!(
            accumulator(&Aggregate::of(AggregateMethod::Avg, "price")),
            doc! { "$avg": "$price" }
        );
        assert_eq!(accumulator(&Aggregate::count()), doc! { "$sum": 1 });
    }
}
