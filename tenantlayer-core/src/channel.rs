//! Append-only tenant message channels.
//!
//! A channel is addressed by a path of segments joined with `/`, for example
//! `rooms/42/chat`. Messages of every tenant live in one reserved collection and are told
//! apart by the tenant field and the `channel` field.

use bson::{Bson, Document};
use tracing::{debug, instrument};

use crate::{
    backend::StoreBackend,
    collection::TenantCollection,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, Filter, Query, SortDirection},
    record::CREATED_AT_FIELD,
};

/// Field holding the channel path on every message.
pub const CHANNEL_FIELD: &str = "channel";

/// Joins path segments into a channel address.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidQuery`] if there are no segments or any segment is
/// blank.
pub fn channel_path<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> DocumentStoreResult<String> {
    let segments = segments
        .into_iter()
        .map(|segment| {
            let segment = segment.as_ref().trim();
            if segment.is_empty() {
                Err(DocumentStoreError::InvalidQuery(
                    "channel path segments must not be empty".to_string(),
                ))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    if segments.is_empty() {
        return Err(DocumentStoreError::InvalidQuery(
            "channel path must have at least one segment".to_string(),
        ));
    }

    Ok(segments.join("/"))
}

/// One channel as seen by one tenant.
#[derive(Debug)]
pub struct Channel<'a, B: StoreBackend> {
    path: String,
    messages: TenantCollection<'a, B>,
}

impl<'a, B: StoreBackend> Channel<'a, B> {
    pub(crate) fn new(path: String, messages: TenantCollection<'a, B>) -> Self {
        Self { path, messages }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends a message and returns the stored record.
    #[instrument(skip_all, fields(tenant = %self.messages.context().tenant(), request_id = %self.messages.context().request_id(), channel = %self.path))]
    pub async fn publish(&self, mut data: Document) -> DocumentStoreResult<Bson> {
        data.insert(CHANNEL_FIELD, self.path.as_str());
        let message = self.messages.create(data).await?;
        debug!("published message");
        Ok(message)
    }

    /// Messages on this exact path in publication order, optionally narrowed by `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::ForbiddenFilter`] if the filter names the tenant field.
    #[instrument(skip_all, fields(tenant = %self.messages.context().tenant(), request_id = %self.messages.context().request_id(), channel = %self.path))]
    pub async fn messages(&self, filter: Option<Expr>) -> DocumentStoreResult<Vec<Bson>> {
        let on_path = Filter::eq(CHANNEL_FIELD, self.path.as_str());
        let filter = match filter {
            Some(filter) => Filter::and([on_path, filter]),
            None => on_path,
        };

        self.messages
            .query(
                Query::builder()
                    .filter(filter)
                    .sort(CREATED_AT_FIELD, SortDirection::Asc)
                    .build(),
            )
            .await
    }
}
