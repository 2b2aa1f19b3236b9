//! Mapping between documents and the vectors/labels of a clustering run.
//!
//! A run over several vector fields concatenates them per document in field
//! order; [`FieldLengthMap`] remembers where each field sits so centers can be
//! split back into per-field vectors.

use crate::cluster::{ClusterAlgorithm, ClusterLabel};
use crate::config::DEFAULT_CLUSTER_FIELD;
use crate::document::{vector_value, Document, ID_FIELD};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// What to do with a document lacking a vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Leave the document out of the run (for several fields: if any is missing).
    #[default]
    Skip,
    /// Fail with [`Error::MissingField`].
    Fail,
}

/// Ordered `[start, end)` span of each vector field inside a concatenated vector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldLengthMap {
    spans: Vec<(String, Range<usize>)>,
}

impl FieldLengthMap {
    /// Build from `(field, length)` pairs in concatenation order.
    pub fn from_lengths<'a>(lengths: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        let mut start = 0;
        let spans = lengths
            .into_iter()
            .map(|(field, len)| {
                let span = start..start + len;
                start += len;
                (field.to_string(), span)
            })
            .collect();
        Self { spans }
    }

    /// Total concatenated dimension.
    pub fn dimension(&self) -> usize {
        self.spans.last().map_or(0, |(_, s)| s.end)
    }

    /// Span of `field`, if present.
    pub fn span(&self, field: &str) -> Option<Range<usize>> {
        self.spans
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, s)| s.clone())
    }

    /// Fields with their spans, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Range<usize>)> {
        self.spans.iter().map(|(f, s)| (f.as_str(), s.clone()))
    }

    /// Concatenate per-field parts, checking each against its span.
    pub fn concat(&self, parts: &[Vec<f32>]) -> Result<Vec<f32>> {
        if parts.len() != self.spans.len() {
            return Err(Error::LengthMismatch {
                left_name: "vector parts",
                left: parts.len(),
                right_name: "vector fields",
                right: self.spans.len(),
            });
        }
        let mut out = Vec::with_capacity(self.dimension());
        for (part, (_, span)) in parts.iter().zip(&self.spans) {
            if part.len() != span.len() {
                return Err(Error::DimensionMismatch {
                    expected: span.len(),
                    found: part.len(),
                });
            }
            out.extend_from_slice(part);
        }
        Ok(out)
    }

    /// Split a concatenated vector back into `(field, part)` pairs.
    pub fn split<'a>(&'a self, vector: &[f32]) -> Result<Vec<(&'a str, Vec<f32>)>> {
        if vector.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                found: vector.len(),
            });
        }
        Ok(self
            .spans
            .iter()
            .map(|(f, s)| (f.as_str(), vector[s.clone()].to_vec()))
            .collect())
    }
}

/// Vectors pulled out of a set of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Position of each extracted document in the input slice.
    pub indices: Vec<usize>,
    /// One (concatenated) vector per extracted document.
    pub vectors: Vec<Vec<f32>>,
    /// Field layout inside each vector.
    pub field_lengths: FieldLengthMap,
}

impl Extraction {
    /// Number of extracted documents.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Pull the vectors of `vector_fields` out of `documents`.
///
/// Multi-field vectors are concatenated in field order. The layout is fixed
/// by the first extracted document; later documents whose per-field lengths
/// differ are rejected with [`Error::DimensionMismatch`].
pub fn extract(
    vector_fields: &[String],
    documents: &[Document],
    missing: MissingPolicy,
) -> Result<Extraction> {
    if vector_fields.is_empty() {
        return Err(Error::invalid_parameter("vector_fields", "must not be empty"));
    }

    let mut indices = Vec::new();
    let mut vectors = Vec::new();
    let mut field_lengths: Option<FieldLengthMap> = None;

    'docs: for (i, doc) in documents.iter().enumerate() {
        let mut parts = Vec::with_capacity(vector_fields.len());
        for field in vector_fields {
            match doc.vector(field)? {
                Some(v) => parts.push(v),
                None if missing == MissingPolicy::Skip => continue 'docs,
                None => {
                    return Err(Error::MissingField {
                        id: doc.display_id().to_string(),
                        field: field.clone(),
                    })
                }
            }
        }

        let layout = field_lengths.get_or_insert_with(|| {
            let lengths = parts.iter().map(Vec::len);
            FieldLengthMap::from_lengths(vector_fields.iter().map(String::as_str).zip(lengths))
        });
        vectors.push(layout.concat(&parts)?);
        indices.push(i);
    }

    tracing::debug!(
        extracted = vectors.len(),
        skipped = documents.len() - vectors.len(),
        fields = vector_fields.len(),
        "extracted vectors"
    );
    Ok(Extraction {
        indices,
        vectors,
        field_lengths: field_lengths.unwrap_or_default(),
    })
}

/// Dot-path where labels of a run are written: `root.f1[.f2...].alias`.
pub fn label_path(root: &str, vector_fields: &[String], alias: &str) -> String {
    let mut path = String::from(root);
    for field in vector_fields {
        path.push('.');
        path.push_str(field);
    }
    path.push('.');
    path.push_str(alias);
    path
}

/// Write `labels[i]` at `path` of `documents[i]`.
pub fn write_labels(documents: &mut [Document], path: &str, labels: &[ClusterLabel]) -> Result<()> {
    if documents.len() != labels.len() {
        return Err(Error::LengthMismatch {
            left_name: "documents",
            left: documents.len(),
            right_name: "labels",
            right: labels.len(),
        });
    }
    for (doc, label) in documents.iter_mut().zip(labels) {
        doc.set(path, label.to_string());
    }
    Ok(())
}

/// One document per center: `_id` is the label, each vector field holds its part.
///
/// `centers[k]` belongs to `ClusterLabel::Cluster(k)`.
pub fn centroid_documents(
    centers: &[Vec<f32>],
    field_lengths: &FieldLengthMap,
) -> Result<Vec<Document>> {
    let labelled: Vec<(ClusterLabel, Vec<f32>)> = centers
        .iter()
        .enumerate()
        .map(|(k, c)| (ClusterLabel::Cluster(k), c.clone()))
        .collect();
    labelled_centroid_documents(&labelled, field_lengths)
}

/// Like [`centroid_documents`] for explicitly labelled centers.
pub fn labelled_centroid_documents(
    centers: &[(ClusterLabel, Vec<f32>)],
    field_lengths: &FieldLengthMap,
) -> Result<Vec<Document>> {
    centers
        .iter()
        .map(|(label, center)| {
            let mut doc = Document::new(label.to_string());
            for (field, part) in field_lengths.split(center)? {
                doc.set(field, vector_value(&part));
            }
            Ok(doc)
        })
        .collect()
}

/// Options for [`fit_documents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitOptions {
    /// Last label path segment.
    pub alias: String,
    /// Root of the label path.
    pub cluster_field: String,
    /// Return `{_id, <cluster_field>}` projections instead of full documents.
    pub return_only_clusters: bool,
    /// Write labels into the caller's documents instead of a copy.
    pub inplace: bool,
    /// Handling of documents lacking a vector field.
    pub missing: MissingPolicy,
}

impl FitOptions {
    /// Defaults for `alias`: root `_cluster_`, full documents on a copy, skip missing.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            cluster_field: DEFAULT_CLUSTER_FIELD.to_string(),
            return_only_clusters: false,
            inplace: false,
            missing: MissingPolicy::Skip,
        }
    }
}

/// Result of [`fit_documents`].
#[derive(Debug, Clone)]
pub struct FittedDocuments {
    /// Labelled documents (or projections), in input order; skipped documents excluded.
    pub documents: Vec<Document>,
    /// Label per returned document.
    pub labels: Vec<ClusterLabel>,
    /// The extraction the algorithm saw.
    pub extraction: Extraction,
    /// Path the labels were written to.
    pub label_path: String,
}

/// Extract, fit, and write labels in one step.
pub fn fit_documents(
    algorithm: &mut dyn ClusterAlgorithm,
    vector_fields: &[String],
    documents: &mut [Document],
    options: &FitOptions,
) -> Result<FittedDocuments> {
    let extraction = extract(vector_fields, documents, options.missing)?;
    if extraction.is_empty() {
        return Err(Error::EmptyInput);
    }
    let labels = algorithm.fit_transform(&extraction.vectors)?;
    let path = label_path(&options.cluster_field, vector_fields, &options.alias);

    let mut labelled: Vec<Document> = extraction
        .indices
        .iter()
        .map(|&i| documents[i].clone())
        .collect();
    write_labels(&mut labelled, &path, &labels)?;

    if options.inplace {
        for (&i, doc) in extraction.indices.iter().zip(&labelled) {
            documents[i] = doc.clone();
        }
    }

    if options.return_only_clusters {
        let keep = [ID_FIELD.to_string(), options.cluster_field.clone()];
        labelled = labelled.iter().map(|d| d.project(&keep)).collect();
    }

    Ok(FittedDocuments {
        documents: labelled,
        labels,
        extraction,
        label_path: path,
    })
}
