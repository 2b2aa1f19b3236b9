//! Text explanations for the closest members of each cluster.

use super::ClusterOps;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::store::{BatchResult, CentroidQueryOptions, CentroidResults, DocumentStore};
use serde_json::Value;

/// Root field explanations are written under.
pub const DEFAULT_EXPLAIN_FIELD: &str = "_explain_";

/// Result of [`ClusterOps::explain_text_clusters`].
#[derive(Debug, Clone, Default)]
pub struct ExplainedClusters {
    /// Closest documents per cluster, as retrieved.
    pub closest: CentroidResults,
    /// Outcome of writing the explanations back.
    pub write: BatchResult,
}

impl<'s, S: DocumentStore + ?Sized> ClusterOps<'s, S> {
    /// Annotate the `n_closest` documents of each cluster with explanations.
    ///
    /// `explain(query, answer)` is called once per annotated document. The
    /// document nearest the centroid is explained against the second nearest;
    /// every other document is explained against the nearest. Clusters with
    /// fewer than two documents are skipped. Results land at
    /// `{output_field}.{text_field}` of the annotated documents only.
    pub fn explain_text_clusters<F>(
        &self,
        text_field: &str,
        mut explain: F,
        n_closest: usize,
        output_field: Option<&str>,
    ) -> Result<ExplainedClusters>
    where
        F: FnMut(&str, &str) -> Value,
    {
        let output = format!("{}.{text_field}", output_field.unwrap_or(DEFAULT_EXPLAIN_FIELD));
        let closest = self.list_closest(
            CentroidQueryOptions::default()
                .with_page_size(n_closest)
                .with_select_fields(vec![text_field.to_string()]),
        )?;

        let mut updates = Vec::new();
        for (cluster, members) in &closest.results {
            if members.results.len() < 2 {
                tracing::debug!(
                    cluster = %cluster,
                    members = members.results.len(),
                    "too few documents to explain"
                );
                continue;
            }
            let texts = members
                .results
                .iter()
                .map(|doc| {
                    doc.get(text_field).and_then(Value::as_str).ok_or_else(|| Error::MissingField {
                        id: doc.display_id().to_string(),
                        field: text_field.to_string(),
                    })
                })
                .collect::<Result<Vec<&str>>>()?;

            let (first, rest) = (texts[0], &texts[1..]);
            for (i, doc) in members.results.iter().enumerate() {
                let value = if i == 0 {
                    explain(rest[0], first)
                } else {
                    explain(first, texts[i])
                };
                let mut update = Document::new(doc.display_id());
                update.set(&output, value);
                updates.push(update);
            }
        }

        let write = if updates.is_empty() {
            BatchResult::default()
        } else {
            self.store()
                .update_documents(self.dataset_id(), updates, self.config().update_chunk_size)?
        };
        tracing::info!(
            dataset_id = self.dataset_id(),
            clusters = closest.results.len(),
            explained = write.processed,
            "explained clusters"
        );
        Ok(ExplainedClusters { closest, write })
    }
}
