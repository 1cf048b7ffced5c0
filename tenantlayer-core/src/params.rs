//! Untyped request parameters.
//!
//! A transport decodes its query string or body into a JSON object and hands it over as
//! [`RequestParams`]. Structured parameters may be sent either as JSON values or as
//! JSON-encoded strings, which is how they arrive through a query string.

use serde_json::{Map, Value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Key/value parameters of a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    values: Map<String, Value>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds parameters from a JSON object. Non-object values yield empty parameters.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    /// Adds or replaces a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the raw value, treating null as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    /// Returns a structured parameter, decoding it when it was sent as a JSON string.
    ///
    /// Strings that do not decode to an array or object are returned unchanged, so a bare
    /// field name such as `s=title` still reaches the parser.
    pub fn structured(&self, key: &str) -> Option<Value> {
        let value = self.get(key)?;
        match value {
            Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
                Ok(decoded @ (Value::Array(_) | Value::Object(_))) => Some(decoded),
                _ if text.trim().is_empty() => None,
                _ => Some(value.clone()),
            },
            _ => Some(value.clone()),
        }
    }

    /// Reads a non-negative integer parameter.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] if the value is present but is not a
    /// non-negative integer.
    pub fn usize(&self, key: &str) -> DocumentStoreResult<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value_as_usize(value)
                .map(Some)
                .ok_or_else(|| {
                    DocumentStoreError::InvalidQuery(format!(
                        "{key} must be a non-negative integer"
                    ))
                }),
        }
    }

    /// Reads a flag using loose truthiness: `false`, `0`, `""`, `"0"`, `"false"` and null
    /// are false, everything else is true.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => {
                !matches!(s.trim().to_ascii_lowercase().as_str(), "" | "0" | "false")
            }
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) => false,
        }
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Interprets a JSON number or numeric string as a non-negative integer.
pub(crate) fn value_as_usize(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}
