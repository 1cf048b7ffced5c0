//! Client filter parsing.
//!
//! Turns the nested `q` parameter into an [`Expr`] tree. The accepted shapes are:
//!
//! ```text
//! filter := [entry, ...]                  all entries must match
//!         | entry
//! entry  := [field, op, value]
//!         | [field, value]                equality
//!         | [field, "exists"]
//!         | {"and": [entry, ...]} | {"or": [entry, ...]} | {"not": entry}
//!         | {field: value, ...}           equalities, all must match
//!         | {field: {op: value, ...}}     comparisons, all must match
//! ```
//!
//! Operators come from a closed table; anything else is rejected. A filter that names the
//! tenant field is rejected outright so it can never be OR-ed against the scoping predicate.

use bson::Bson;
use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    config::StoreConfig,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp},
    record::TENANT_FIELD,
    value::json_to_bson,
};

/// A filter operator accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Compare(FieldOp),
    Exists(bool),
}

impl Operator {
    /// Looks up an operator by name. A leading `$` and letter case are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let name = name.strip_prefix('$').unwrap_or(name).to_ascii_lowercase();

        Some(match name.as_str() {
            "=" | "==" | "eq" => Operator::Compare(FieldOp::Eq),
            "!=" | "<>" | "ne" | "neq" => Operator::Compare(FieldOp::Ne),
            ">" | "gt" => Operator::Compare(FieldOp::Gt),
            ">=" | "gte" => Operator::Compare(FieldOp::Gte),
            "<" | "lt" => Operator::Compare(FieldOp::Lt),
            "<=" | "lte" => Operator::Compare(FieldOp::Lte),
            "in" => Operator::Compare(FieldOp::AnyOf),
            "not_in" | "nin" | "not in" => Operator::Compare(FieldOp::NoneOf),
            "contains" => Operator::Compare(FieldOp::Contains),
            "not_contains" => Operator::Compare(FieldOp::NotContains),
            "starts_with" => Operator::Compare(FieldOp::StartsWith),
            "ends_with" => Operator::Compare(FieldOp::EndsWith),
            "exists" => Operator::Exists(true),
            "not_exists" => Operator::Exists(false),
            _ => return None,
        })
    }
}

/// Parses client filters under the limits of a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct FilterParser {
    max_depth: usize,
    max_in_set: usize,
}

impl FilterParser {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            max_depth: config.max_filter_depth,
            max_in_set: config.max_in_set,
        }
    }

    /// Parses a filter. Null, empty arrays and empty objects mean "no filter".
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::InvalidQuery`] for malformed entries, unknown operators,
    ///   oversized sets or excessive nesting.
    /// - [`DocumentStoreError::ForbiddenFilter`] if any entry names the tenant field.
    pub fn parse(&self, value: &Value) -> DocumentStoreResult<Option<Expr>> {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) if items.is_empty() => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Array(items) if !matches!(items.first(), Some(Value::String(_))) => {
                let mut exprs = items
                    .iter()
                    .map(|item| self.parse_entry(item, 1))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;

                Ok(Some(if exprs.len() == 1 {
                    exprs.remove(0)
                } else {
                    Expr::And(exprs)
                }))
            }
            Value::Array(_) | Value::Object(_) => self.parse_entry(value, 1).map(Some),
            other => Err(DocumentStoreError::InvalidQuery(format!(
                "filter must be an array or object, got {other}"
            ))),
        }
    }

    fn parse_entry(&self, value: &Value, depth: usize) -> DocumentStoreResult<Expr> {
        if depth > self.max_depth {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "filter nesting exceeds the maximum depth of {}",
                self.max_depth
            )));
        }

        match value {
            Value::Array(items) => self.parse_tuple(items),
            Value::Object(map) => self.parse_object(map, depth),
            other => Err(DocumentStoreError::InvalidQuery(format!(
                "filter entry must be an array or object, got {other}"
            ))),
        }
    }

    fn parse_tuple(&self, items: &[Value]) -> DocumentStoreResult<Expr> {
        match items {
            [Value::String(field), Value::String(op)] => match Operator::from_name(op) {
                Some(Operator::Exists(should_exist)) => {
                    self.leaf(field, Operator::Exists(should_exist), &Value::Null)
                }
                _ => self.leaf(field, Operator::Compare(FieldOp::Eq), &items[1]),
            },
            [Value::String(field), value] => {
                self.leaf(field, Operator::Compare(FieldOp::Eq), value)
            }
            [Value::String(field), Value::String(op), value] => {
                let operator = Operator::from_name(op).ok_or_else(|| {
                    DocumentStoreError::InvalidQuery(format!(
                        "unknown operator {op} for field {field}"
                    ))
                })?;
                self.leaf(field, operator, value)
            }
            _ => Err(DocumentStoreError::InvalidQuery(
                "filter entries must be [field, value] or [field, operator, value]".to_string(),
            )),
        }
    }

    fn parse_object(&self, map: &Map<String, Value>, depth: usize) -> DocumentStoreResult<Expr> {
        if let (1, Some((key, value))) = (map.len(), map.iter().next()) {
            let combinator = key.strip_prefix('$').unwrap_or(key).to_ascii_lowercase();

            match combinator.as_str() {
                "and" => return Ok(Expr::And(self.parse_list(key, value, depth)?)),
                "or" => return Ok(Expr::Or(self.parse_list(key, value, depth)?)),
                "not" => return Ok(self.parse_entry(value, depth + 1)?.not()),
                _ => {}
            }
        }

        let mut exprs = Vec::with_capacity(map.len());
        for (field, value) in map {
            match value {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| Operator::from_name(k).is_some()) => {
                    for (op, operand) in ops {
                        let operator = Operator::from_name(op).ok_or_else(|| {
                            DocumentStoreError::InvalidQuery(format!("unknown operator {op}"))
                        })?;
                        exprs.push(self.leaf(field, operator, operand)?);
                    }
                }
                _ => exprs.push(self.leaf(field, Operator::Compare(FieldOp::Eq), value)?),
            }
        }

        Ok(if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            Expr::And(exprs)
        })
    }

    fn parse_list(&self, key: &str, value: &Value, depth: usize) -> DocumentStoreResult<Vec<Expr>> {
        match value {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| self.parse_entry(item, depth + 1))
                .collect(),
            _ => Err(DocumentStoreError::InvalidQuery(format!(
                "{key} expects a non-empty list of filter entries"
            ))),
        }
    }

    fn leaf(&self, field: &str, operator: Operator, value: &Value) -> DocumentStoreResult<Expr> {
        check_field(field)?;

        match operator {
            Operator::Exists(should_exist) => match value {
                Value::Null => Ok(Expr::Exists(field.to_string(), should_exist)),
                Value::Bool(b) => Ok(Expr::Exists(field.to_string(), should_exist == *b)),
                _ => Err(DocumentStoreError::InvalidQuery(format!(
                    "exists on {field} takes a boolean"
                ))),
            },
            Operator::Compare(op @ (FieldOp::AnyOf | FieldOp::NoneOf)) => match value {
                Value::Array(items) if items.len() <= self.max_in_set => {
                    Ok(Expr::field(field.to_string(), op, json_to_bson(value)))
                }
                Value::Array(_) => Err(DocumentStoreError::InvalidQuery(format!(
                    "set for {field} exceeds {} values",
                    self.max_in_set
                ))),
                _ => Err(DocumentStoreError::InvalidQuery(format!(
                    "in/not_in on {field} takes a list of values"
                ))),
            },
            Operator::Compare(op @ (FieldOp::StartsWith | FieldOp::EndsWith)) => match value {
                Value::String(s) => Ok(Expr::field(field.to_string(), op, Bson::String(s.clone()))),
                _ => Err(DocumentStoreError::InvalidQuery(format!(
                    "starts_with/ends_with on {field} takes a string"
                ))),
            },
            Operator::Compare(op) => Ok(Expr::field(field.to_string(), op, json_to_bson(value))),
        }
    }
}

fn check_field(field: &str) -> DocumentStoreResult<()> {
    if field.is_empty() {
        return Err(DocumentStoreError::InvalidQuery(
            "filter field names must not be empty".to_string(),
        ));
    }
    if field == TENANT_FIELD {
        warn!(field, "client filter referenced the tenant scoping field");
        return Err(DocumentStoreError::ForbiddenFilter(format!(
            "filtering on {TENANT_FIELD} is not allowed"
        )));
    }

    Ok(())
}
