//! Conversions between client JSON and stored BSON, and numeric helpers shared by backends.
//!
//! Client payloads are converted structurally: `$`-prefixed keys are kept as plain keys and
//! never interpreted as extended JSON.

use bson::{Bson, Document};
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Converts a JSON value into BSON. Integers become `Int64`, other numbers `Double`.
pub fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_bson(v)))
                .collect::<Document>(),
        ),
    }
}

/// Converts a JSON object into a BSON document.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if the value is not an object.
pub fn document_from_json(value: &Value) -> DocumentStoreResult<Document> {
    match json_to_bson(value) {
        Bson::Document(doc) => Ok(doc),
        other => Err(DocumentStoreError::InvalidDocument(format!(
            "expected an object, got {}",
            type_name(&other)
        ))),
    }
}

/// Renders a stored value as plain JSON: datetimes become RFC 3339 strings, non-finite
/// doubles become null and other BSON-only types use their display form.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Int64(i) => Value::Number((*i).into()),
        Bson::Double(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        Bson::DateTime(dt) => {
            Value::String(dt.to_chrono().to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        other => Value::String(other.to_string()),
    }
}

/// Returns the numeric value of an integer or double.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

pub fn is_numeric(value: &Bson) -> bool {
    as_f64(value).is_some()
}

/// Negates a numeric delta.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidQuery`] if the delta is not numeric.
pub fn negate(delta: &Bson) -> DocumentStoreResult<Bson> {
    match delta {
        Bson::Int32(i) => Ok(Bson::Int64(-i64::from(*i))),
        Bson::Int64(i) => Ok(i
            .checked_neg()
            .map(Bson::Int64)
            .unwrap_or(Bson::Double(-(*i as f64)))),
        Bson::Double(d) => Ok(Bson::Double(-d)),
        other => Err(DocumentStoreError::InvalidQuery(format!(
            "operation value must be numeric, got {}",
            type_name(other)
        ))),
    }
}

/// Adds `delta` to the current value of `field`. A missing or null value counts as zero.
///
/// Integer plus integer stays an integer unless it overflows, in which case the sum is
/// promoted to a double. Any double operand yields a double.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidDocument`] if the stored value is not numeric.
pub fn add_numeric(field: &str, current: Option<&Bson>, delta: &Bson) -> DocumentStoreResult<Bson> {
    let current = match current {
        None | Some(Bson::Null) => &Bson::Int64(0),
        Some(value) => value,
    };

    if let (Some(a), Some(b)) = (as_i64(current), as_i64(delta)) {
        return Ok(a
            .checked_add(b)
            .map(Bson::Int64)
            .unwrap_or(Bson::Double(a as f64 + b as f64)));
    }

    match (as_f64(current), as_f64(delta)) {
        (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
        (None, _) => Err(DocumentStoreError::InvalidDocument(format!(
            "field {field} holds a {} and cannot be incremented",
            type_name(current)
        ))),
        (_, None) => Err(DocumentStoreError::InvalidQuery(format!(
            "operation value must be numeric, got {}",
            type_name(delta)
        ))),
    }
}

pub(crate) fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Null => "null",
        Bson::Boolean(_) => "boolean",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => "number",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::DateTime(_) => "datetime",
        _ => "value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[test]
    fn json_objects_convert_structurally() {
        let doc = document_from_json(&json!({ "title": "a", "n": 3, "x": 1.5, "$where": "1" }))
            .unwrap();
        assert_eq!(doc, doc! { "title": "a", "n": 3_i64, "x": 1.5, "$where": "1" });
        assert!(document_from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn renders_datetimes_as_rfc3339() {
        let dt = bson::DateTime::from_millis(0);
        assert_eq!(bson_to_json(&Bson::DateTime(dt)), json!("1970-01-01T00:00:00.000Z"));
        assert_eq!(bson_to_json(&Bson::Double(f64::NAN)), Value::Null);
    }

    #[test]
    fn add_numeric_treats_missing_as_zero() {
        assert_eq!(add_numeric("n", None, &Bson::Int64(5)).unwrap(), Bson::Int64(5));
        assert_eq!(
            add_numeric("n", Some(&Bson::Int32(3)), &Bson::Int64(5)).unwrap(),
            Bson::Int64(8)
        );
        assert_eq!(
            add_numeric("n", Some(&Bson::Double(1.5)), &Bson::Int64(1)).unwrap(),
            Bson::Double(2.5)
        );
    }

    #[test]
    fn add_numeric_promotes_on_overflow() {
        let sum = add_numeric("n", Some(&Bson::Int64(i64::MAX)), &Bson::Int64(1)).unwrap();
        assert!(matches!(sum, Bson::Double(_)));
    }

    #[test]
    fn add_numeric_rejects_strings() {
        let err = add_numeric("n", Some(&Bson::String("x".into())), &Bson::Int64(1)).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
        assert!(negate(&Bson::String("1".into())).is_err());
        assert_eq!(negate(&Bson::Int64(4)).unwrap(), Bson::Int64(-4));
    }
}
