//! Error types and result types for tenant-scoped document operations.
//!
//! Every fallible operation in the workspace returns [`DocumentStoreResult<T>`]. Errors carry
//! enough structure for a request boundary to pick a status code via
//! [`DocumentStoreError::status_code`] without inspecting message text.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a tenant document store.
///
/// Client errors (malformed parameters, forbidden filters, unknown ids) are never retried.
/// Only [`DocumentStoreError::ConcurrentUpdateConflict`] is safe for the caller to retry.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// The request parameters could not be turned into a valid query or update.
    ///
    /// Covers unknown operators, bad sort directions, non-whitelisted aggregation or
    /// operation methods and malformed pagination values.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The client referenced the tenant scoping field.
    #[error("Forbidden filter: {0}")]
    ForbiddenFilter(String),
    /// The request key did not resolve to a tenant.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The caller is authenticated but may not use the route.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The document or payload has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An atomic field operation ran out of optimistic retries.
    #[error("Concurrent update conflict on field {field} after {attempts} attempts")]
    ConcurrentUpdateConflict {
        /// The field being adjusted.
        field: String,
        /// How many compare-and-swap rounds were attempted.
        attempts: u32,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    /// A stable, machine readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentStoreError::InvalidQuery(_) => "invalid_query",
            DocumentStoreError::ForbiddenFilter(_) => "forbidden_filter",
            DocumentStoreError::Unauthorized(_) => "unauthorized",
            DocumentStoreError::Forbidden(_) => "forbidden",
            DocumentStoreError::DocumentNotFound(_, _) => "not_found",
            DocumentStoreError::DocumentAlreadyExists(_, _) => "already_exists",
            DocumentStoreError::InvalidDocument(_) => "invalid_document",
            DocumentStoreError::ConcurrentUpdateConflict { .. } => "concurrent_update_conflict",
            DocumentStoreError::Serialization(_) => "serialization",
            DocumentStoreError::Initialization(_) => "initialization",
            DocumentStoreError::Backend(_) => "backend",
        }
    }

    /// The HTTP-style status code a request boundary should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DocumentStoreError::InvalidQuery(_) | DocumentStoreError::InvalidDocument(_) => 400,
            DocumentStoreError::Unauthorized(_) => 401,
            DocumentStoreError::ForbiddenFilter(_) | DocumentStoreError::Forbidden(_) => 403,
            DocumentStoreError::DocumentNotFound(_, _) => 404,
            DocumentStoreError::DocumentAlreadyExists(_, _)
            | DocumentStoreError::ConcurrentUpdateConflict { .. } => 409,
            DocumentStoreError::Serialization(_)
            | DocumentStoreError::Initialization(_)
            | DocumentStoreError::Backend(_) => 500,
        }
    }

    /// Returns true if the error was caused by the request rather than the store.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocumentStoreError::ConcurrentUpdateConflict { .. })
    }
}

/// A specialized `Result` type for document store operations.
///
/// This type alias is used throughout the workspace to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(DocumentStoreError::InvalidQuery("bad".into()).status_code(), 400);
        assert_eq!(DocumentStoreError::ForbiddenFilter("app_id".into()).status_code(), 403);
        assert_eq!(
            DocumentStoreError::DocumentNotFound("1".into(), "todos".into()).status_code(),
            404
        );
        assert!(DocumentStoreError::Unauthorized("key".into()).is_client_error());
        assert_eq!(DocumentStoreError::Forbidden("admin".into()).status_code(), 403);
        assert_eq!(DocumentStoreError::Forbidden("admin".into()).kind(), "forbidden");
        assert!(!DocumentStoreError::Backend("down".into()).is_client_error());
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = DocumentStoreError::ConcurrentUpdateConflict {
            field: "count".into(),
            attempts: 8,
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind(), "concurrent_update_conflict");
        assert!(!DocumentStoreError::InvalidQuery("x".into()).is_retryable());
    }
}
