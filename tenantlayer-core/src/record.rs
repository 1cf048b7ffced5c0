//! Server-managed record fields and collection naming rules.

use bson::{Bson, DateTime, Document, Uuid};
use chrono::Utc;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Record identifier, a UUID string generated on create.
pub const ID_FIELD: &str = "_id";
/// The tenant scoping field. Stamped by the server and never accepted from clients.
pub const TENANT_FIELD: &str = "app_id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Keys removed from client payloads before they are written.
pub const PROTECTED_FIELDS: [&str; 3] = [ID_FIELD, TENANT_FIELD, CREATED_AT_FIELD];

/// Collection holding channel messages for every tenant.
pub const CHANNEL_COLLECTION: &str = "__channel_messages";
/// Collection holding key-value entries for every tenant.
pub const KEY_VALUE_COLLECTION: &str = "__key_values";
/// Collection holding named app configs for every tenant.
pub const CONFIG_COLLECTION: &str = "__configs";
/// Collection holding named app modules for every tenant.
pub const MODULE_COLLECTION: &str = "__modules";

const MAX_COLLECTION_NAME_LEN: usize = 64;

pub fn new_record_id() -> String {
    Uuid::new().to_string()
}

pub fn now() -> Bson {
    Bson::DateTime(DateTime::from_chrono(Utc::now()))
}

/// Returns the `_id` of a stored record.
pub fn record_id(record: &Bson) -> Option<&str> {
    match record.as_document()?.get(ID_FIELD)? {
        Bson::String(id) => Some(id.as_str()),
        _ => None,
    }
}

/// Removes protected keys from a client payload, returning the names that were dropped.
pub fn strip_protected(doc: &mut Document) -> Vec<&'static str> {
    PROTECTED_FIELDS
        .into_iter()
        .filter(|field| doc.remove(*field).is_some())
        .collect()
}

/// Checks that a client-supplied collection name is usable.
///
/// Names must be 1 to 64 characters of `[A-Za-z0-9_.-]` and must not start with `__`,
/// which is reserved for internal collections.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidQuery`] for unusable names.
pub fn validate_collection_name(name: &str) -> DocumentStoreResult<()> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(DocumentStoreError::InvalidQuery(format!(
            "collection name must be 1 to {MAX_COLLECTION_NAME_LEN} characters"
        )));
    }
    if name.starts_with("__") {
        return Err(DocumentStoreError::InvalidQuery(format!(
            "collection name {name} is reserved"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(DocumentStoreError::InvalidQuery(format!(
            "collection name {name} contains invalid characters"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn strips_protected_fields() {
        let mut payload = doc! { "_id": "x", "app_id": "other", "created_at": 1, "title": "a" };
        let mut removed = strip_protected(&mut payload);
        removed.sort();
        assert_eq!(removed, vec!["_id", "app_id", "created_at"]);
        assert_eq!(payload, doc! { "title": "a" });
    }

    #[test]
    fn collection_names() {
        assert!(validate_collection_name("todos").is_ok());
        assert!(validate_collection_name("my-items.v2").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("__key_values").is_err());
        assert!(validate_collection_name(CONFIG_COLLECTION).is_err());
        assert!(validate_collection_name("a/b").is_err());
        assert!(validate_collection_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn record_ids_are_unique_strings() {
        assert_ne!(new_record_id(), new_record_id());
        let record = Bson::Document(doc! { "_id": "abc" });
        assert_eq!(record_id(&record), Some("abc"));
    }
}
