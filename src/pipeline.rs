//! Paged pull, transform, push over a whole collection.
//!
//! A document that cannot be written (flagged by the transform, or rejected
//! by the store) is counted as failed and the run carries on. A page round
//! trip that fails as a whole aborts the run with the store's error.

use crate::config::OpsConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::store::{BatchResult, DocumentQuery, DocumentStore, Filter};

/// Paging and chunking of [`pull_update_push`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Documents per read page.
    pub page_size: usize,
    /// Documents per update request.
    pub chunk_size: usize,
    /// Restrict the run to matching documents.
    ///
    /// A transform that makes documents stop matching shifts later pages.
    pub filters: Vec<Filter>,
    /// Fields read and handed to the transform; empty means all.
    pub select_fields: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&OpsConfig::default())
    }
}

impl PipelineOptions {
    /// Page and chunk sizes from `config`, no filters.
    pub fn from_config(config: &OpsConfig) -> Self {
        Self {
            page_size: config.page_size,
            chunk_size: config.update_chunk_size,
            filters: Vec::new(),
            select_fields: Vec::new(),
        }
    }
}

/// Every document matching `query`, following cursors until exhausted.
///
/// `query.cursor` is the starting point; normally `None`.
pub fn pull_all<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    query: &DocumentQuery,
) -> Result<Vec<Document>> {
    let mut query = query.clone();
    let mut documents = Vec::new();
    let mut pages = 0usize;
    loop {
        let page = store.get_documents(collection, &query)?;
        pages += 1;
        let empty = page.documents.is_empty();
        documents.extend(page.documents);
        match page.cursor {
            Some(cursor) if !empty => query.cursor = Some(cursor),
            _ => break,
        }
    }
    tracing::debug!(collection, pages, documents = documents.len(), "pulled collection");
    Ok(documents)
}

/// Apply `transform` to every page of `collection` and write the results back.
///
/// The transform must return as many documents as it was given. Documents it
/// marks with [`Document::mark_invalid`] are reported as failed and not sent.
/// The returned `processed` count covers every document read.
pub fn pull_update_push<S, F>(
    store: &S,
    collection: &str,
    mut transform: F,
    options: &PipelineOptions,
) -> Result<BatchResult>
where
    S: DocumentStore + ?Sized,
    F: FnMut(Vec<Document>) -> Vec<Document>,
{
    let mut query = DocumentQuery::new(options.page_size)
        .with_filters(options.filters.clone())
        .with_select_fields(options.select_fields.clone());
    let mut total = BatchResult::default();
    let mut pages = 0usize;

    loop {
        let page = store.get_documents(collection, &query)?;
        if page.documents.is_empty() {
            break;
        }
        pages += 1;
        let read = page.documents.len();

        let transformed = transform(page.documents);
        if transformed.len() != read {
            return Err(Error::LengthMismatch {
                left_name: "documents read",
                left: read,
                right_name: "documents returned by transform",
                right: transformed.len(),
            });
        }

        let (invalid, valid): (Vec<Document>, Vec<Document>) =
            transformed.into_iter().partition(Document::is_invalid);
        for doc in &invalid {
            tracing::debug!(
                id = doc.display_id(),
                reason = doc.invalid_reason().unwrap_or_default(),
                "skipping invalid document"
            );
        }
        total.merge(BatchResult {
            processed: invalid.len(),
            failed_documents: invalid.iter().map(|d| d.display_id().to_string()).collect(),
        });
        if !valid.is_empty() {
            total.merge(store.update_documents(collection, valid, options.chunk_size)?);
        }

        match page.cursor {
            Some(cursor) => query.cursor = Some(cursor),
            None => break,
        }
    }

    if total.is_success() {
        tracing::info!(collection, pages, processed = total.processed, "pull-update-push finished");
    } else {
        tracing::warn!(
            collection,
            pages,
            processed = total.processed,
            failed = total.failed_documents.len(),
            "pull-update-push finished with failed documents"
        );
    }
    Ok(total)
}
