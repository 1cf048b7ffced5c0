//! Parsing of read request parameters into a [`QuerySpec`].
//!
//! | param    | meaning                                         |
//! |----------|-------------------------------------------------|
//! | `q`      | filter, see [`crate::filter`]                   |
//! | `s`      | ordered sort keys                               |
//! | `g`      | group-by fields                                 |
//! | `offset` | records to skip                                 |
//! | `limit`  | maximum records to return                       |
//! | `p`      | page descriptor, takes precedence over `offset`/`limit` |
//! | `aggr`   | aggregation `{method, field?}`                  |
//! | `f`      | return only the first record                    |

use serde_json::Value;

use crate::{
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    filter::FilterParser,
    page::PaginationParams,
    params::{RequestParams, value_as_usize},
    query::{Aggregate, AggregateMethod, Expr, Sort, SortDirection},
};

/// A validated read request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filter: Option<Expr>,
    pub sort: Vec<Sort>,
    pub group_by: Vec<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub aggregate: Option<Aggregate>,
    pub page: Option<PaginationParams>,
    pub first: bool,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates the read parameters of a request.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] for any malformed parameter and
    /// [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    pub fn parse(params: &RequestParams, config: &StoreConfig) -> DocumentStoreResult<Self> {
        let filter = match params.structured("q") {
            Some(value) => FilterParser::new(config).parse(&value)?,
            None => None,
        };

        let sort = match params.structured("s") {
            Some(value) => parse_sort(&value)?,
            None => Vec::new(),
        };

        let group_by = match params.structured("g") {
            Some(value) => parse_group_by(&value)?,
            None => Vec::new(),
        };

        let aggregate = match params.structured("aggr") {
            Some(value) => Some(parse_aggregate(&value)?),
            None => None,
        };

        let page = match params.structured("p") {
            Some(value) => Some(parse_page(&value, params, config)?),
            None => None,
        };

        // A page descriptor replaces offset/limit entirely.
        let (offset, limit) = if page.is_some() {
            (None, None)
        } else {
            (
                params.usize("offset")?,
                params.usize("limit")?.map(|limit| limit.min(config.max_limit)),
            )
        };

        Ok(QuerySpec {
            filter,
            sort,
            group_by,
            offset,
            limit,
            aggregate,
            page,
            first: params.flag("f"),
        })
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn with_page(mut self, page: PaginationParams) -> Self {
        self.page = Some(page);
        self
    }

    pub fn first_only(mut self) -> Self {
        self.first = true;
        self
    }
}

fn parse_sort(value: &Value) -> DocumentStoreResult<Vec<Sort>> {
    match value {
        Value::String(_) | Value::Object(_) => Ok(vec![parse_sort_entry(value)?]),
        Value::Array(items) if matches!(items.first(), Some(Value::String(_))) => {
            Ok(vec![parse_sort_entry(value)?])
        }
        Value::Array(items) => items.iter().map(parse_sort_entry).collect(),
        other => Err(DocumentStoreError::InvalidQuery(format!(
            "sort must be a field name or a list of [field, direction] pairs, got {other}"
        ))),
    }
}

fn parse_sort_entry(value: &Value) -> DocumentStoreResult<Sort> {
    let (field, direction) = match value {
        Value::String(field) => (field.as_str(), None),
        Value::Array(items) => match items.as_slice() {
            [Value::String(field)] => (field.as_str(), None),
            [Value::String(field), direction] => (field.as_str(), Some(direction)),
            _ => {
                return Err(DocumentStoreError::InvalidQuery(
                    "sort entries must be [field] or [field, direction]".to_string(),
                ));
            }
        },
        Value::Object(map) => match map.get("field") {
            Some(Value::String(field)) => (
                field.as_str(),
                map.get("direction").or_else(|| map.get("dir")),
            ),
            _ => {
                return Err(DocumentStoreError::InvalidQuery(
                    "sort objects need a string field".to_string(),
                ));
            }
        },
        other => {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "invalid sort entry {other}"
            )));
        }
    };

    if field.is_empty() {
        return Err(DocumentStoreError::InvalidQuery(
            "sort field must not be empty".to_string(),
        ));
    }

    let direction = match direction {
        None | Some(Value::Null) => SortDirection::Asc,
        Some(Value::String(dir)) => match dir.trim().to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "invalid sort direction {dir} for {field}"
                )));
            }
        },
        Some(other) => {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "invalid sort direction {other} for {field}"
            )));
        }
    };

    Ok(Sort { field: field.to_string(), direction })
}

fn parse_group_by(value: &Value) -> DocumentStoreResult<Vec<String>> {
    let fields = match value {
        Value::String(field) => vec![field.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(field) => Ok(field.clone()),
                other => Err(DocumentStoreError::InvalidQuery(format!(
                    "group fields must be strings, got {other}"
                ))),
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?,
        other => {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "group must be a field name or a list of field names, got {other}"
            )));
        }
    };

    if fields.iter().any(String::is_empty) {
        return Err(DocumentStoreError::InvalidQuery(
            "group fields must not be empty".to_string(),
        ));
    }

    Ok(fields)
}

fn parse_aggregate(value: &Value) -> DocumentStoreResult<Aggregate> {
    let (method, field) = match value {
        Value::String(method) => (method.as_str(), None),
        Value::Object(map) => {
            let method = match map.get("method") {
                Some(Value::String(method)) => method.as_str(),
                _ => {
                    return Err(DocumentStoreError::InvalidQuery(
                        "aggregation requires a method".to_string(),
                    ));
                }
            };
            let field = match map.get("field") {
                None | Some(Value::Null) => None,
                Some(Value::String(field)) if field.is_empty() => None,
                Some(Value::String(field)) => Some(field.clone()),
                Some(other) => {
                    return Err(DocumentStoreError::InvalidQuery(format!(
                        "aggregation field must be a string, got {other}"
                    )));
                }
            };
            (method, field)
        }
        other => {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "aggregation must be an object, got {other}"
            )));
        }
    };

    let method = AggregateMethod::from_name(method).ok_or_else(|| {
        DocumentStoreError::InvalidQuery(format!("unsupported aggregation method {method}"))
    })?;

    match (method, field) {
        (AggregateMethod::Count, None) => Ok(Aggregate::count()),
        (AggregateMethod::Count, Some(_)) => Err(DocumentStoreError::InvalidQuery(
            "count does not take a field".to_string(),
        )),
        (method, Some(field)) => Ok(Aggregate::of(method, field)),
        (method, None) => Err(DocumentStoreError::InvalidQuery(format!(
            "{} requires a field",
            method.as_str()
        ))),
    }
}

fn parse_page(
    value: &Value,
    params: &RequestParams,
    config: &StoreConfig,
) -> DocumentStoreResult<PaginationParams> {
    let (page, per_page) = match value {
        Value::Object(map) => {
            let lookup = |keys: &[&str]| -> DocumentStoreResult<Option<usize>> {
                match keys.iter().find_map(|key| map.get(*key).filter(|v| !v.is_null())) {
                    None => Ok(None),
                    Some(v) => value_as_usize(v).map(Some).ok_or_else(|| {
                        DocumentStoreError::InvalidQuery(format!(
                            "page value {v} is not a positive integer"
                        ))
                    }),
                }
            };
            (
                lookup(&["page", "number"])?.unwrap_or(1),
                lookup(&["per_page", "size", "page_size"])?.unwrap_or(config.default_page_size),
            )
        }
        other => {
            let per_page = value_as_usize(other).ok_or_else(|| {
                DocumentStoreError::InvalidQuery(format!(
                    "page size {other} is not a positive integer"
                ))
            })?;
            (params.usize("page")?.unwrap_or(1), per_page)
        }
    };

    if page == 0 || per_page == 0 {
        return Err(DocumentStoreError::InvalidQuery(
            "page and page size start at 1".to_string(),
        ));
    }

    Ok(PaginationParams::new(page, per_page.min(config.max_page_size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use serde_json::json;

    fn parse(value: Value) -> DocumentStoreResult<QuerySpec> {
        QuerySpec::parse(&RequestParams::from_value(value), &StoreConfig::default())
    }

    #[test]
    fn empty_params_fetch_everything() {
        assert_eq!(parse(json!({})).unwrap(), QuerySpec::default());
    }

    #[test]
    fn sort_accepts_pairs_and_names() {
        let spec = parse(json!({ "s": [["priority", "DESC"], ["title"]] })).unwrap();
        assert_eq!(spec.sort, vec![Sort::desc("priority"), Sort::asc("title")]);

        let spec = parse(json!({ "s": "title" })).unwrap();
        assert_eq!(spec.sort, vec![Sort::asc("title")]);

        let spec = parse(json!({ "s": ["title", "desc"] })).unwrap();
        assert_eq!(spec.sort, vec![Sort::desc("title")]);

        let spec = parse(json!({ "s": r#"[{"field": "age", "direction": "desc"}]"# })).unwrap();
        assert_eq!(spec.sort, vec![Sort::desc("age")]);
    }

    #[test]
    fn bad_sort_direction_is_rejected() {
        let err = parse(json!({ "s": [["title", "sideways"]] })).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidQuery(_)));
    }

    #[test]
    fn group_by_accepts_one_or_many() {
        assert_eq!(parse(json!({ "g": "status" })).unwrap().group_by, vec!["status"]);
        assert_eq!(
            parse(json!({ "g": ["status", "owner"] })).unwrap().group_by,
            vec!["status", "owner"]
        );
        assert!(parse(json!({ "g": [1] })).is_err());
    }

    #[test]
    fn aggregation_rules() {
        assert_eq!(
            parse(json!({ "aggr": { "method": "count" } })).unwrap().aggregate,
            Some(Aggregate::count())
        );
        assert_eq!(
            parse(json!({ "aggr": { "method": "sum", "field": "price" } }))
                .unwrap()
                .aggregate,
            Some(Aggregate::of(AggregateMethod::Sum, "price"))
        );

        for bad in [
            json!({ "method": "sum" }),
            json!({ "method": "count", "field": "price" }),
            json!({ "method": "delete", "field": "price" }),
            json!({ "field": "price" }),
        ] {
            let err = parse(json!({ "aggr": bad })).unwrap_err();
            assert!(matches!(err, DocumentStoreError::InvalidQuery(_)), "{bad}");
        }
    }

    #[test]
    fn limit_is_clamped() {
        let config = StoreConfig::default().with_max_limit(50);
        let params = RequestParams::new().with("offset", 5).with("limit", "500");
        let spec = QuerySpec::parse(&params, &config).unwrap();
        assert_eq!(spec.offset, Some(5));
        assert_eq!(spec.limit, Some(50));

        assert!(parse(json!({ "limit": "ten" })).is_err());
    }

    #[test]
    fn page_descriptor_forms() {
        let spec = parse(json!({ "p": 25, "page": 3 })).unwrap();
        assert_eq!(spec.page, Some(PaginationParams::new(3, 25)));

        let spec = parse(json!({ "p": { "number": 2, "size": 5 } })).unwrap();
        assert_eq!(spec.page, Some(PaginationParams::new(2, 5)));

        let spec = parse(json!({ "p": {} })).unwrap();
        assert_eq!(spec.page, Some(PaginationParams::new(1, 10)));

        assert!(parse(json!({ "p": 0 })).is_err());
        assert!(parse(json!({ "p": { "page": 0 } })).is_err());
        assert!(parse(json!({ "p": "many" })).is_err());
    }

    #[test]
    fn page_descriptor_overrides_offset_and_limit() {
        let spec = parse(json!({ "p": 10, "offset": 3, "limit": 2 })).unwrap();
        assert_eq!(spec.page, Some(PaginationParams::new(1, 10)));
        assert_eq!(spec.offset, None);
        assert_eq!(spec.limit, None);
    }

    #[test]
    fn filter_and_first_flag() {
        let spec = parse(json!({ "q": r#"[["done", "=", false]]"#, "f": "1" })).unwrap();
        assert_eq!(spec.filter, Some(Filter::eq("done", false)));
        assert!(spec.first);
    }
}
