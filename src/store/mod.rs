//! The remote document store as seen by the clustering core.
//!
//! [`DocumentStore`] is the only seam to the outside world: paged reads,
//! facets, chunked updates and the server-side centroid endpoints. Request
//! and response types mirror the remote wire format (snake_case JSON).
//!
//! Methods take `&self`; an implementation shared across threads must
//! synchronize internally. [`InMemoryStore`] is a local implementation for
//! tests and offline use.

mod memory;

pub use memory::InMemoryStore;

use crate::document::Document;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Field equals `condition_value`.
    ExactMatch,
    /// Field is present and not null.
    Exists,
    /// String field contains, or array field has, `condition_value`.
    Contains,
    /// Numeric comparison `field <condition> condition_value`.
    Numeric,
}

/// A document predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dot-path of the field.
    pub field: String,
    /// Predicate kind.
    pub filter_type: FilterType,
    /// Comparison operator (`==`, `!=`, `>`, `>=`, `<`, `<=`).
    pub condition: String,
    /// Right-hand operand.
    pub condition_value: Value,
}

impl Filter {
    /// `field == value`.
    pub fn exact_match(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            filter_type: FilterType::ExactMatch,
            condition: "==".to_string(),
            condition_value: value.into(),
        }
    }

    /// `field` is present.
    pub fn exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            filter_type: FilterType::Exists,
            condition: "==".to_string(),
            condition_value: Value::String(" ".to_string()),
        }
    }

    /// `field` contains `value`.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            filter_type: FilterType::Contains,
            condition: "==".to_string(),
            condition_value: value.into(),
        }
    }

    /// `field <condition> value` on numbers.
    pub fn numeric(field: impl Into<String>, condition: impl Into<String>, value: f64) -> Self {
        Self {
            field: field.into(),
            filter_type: FilterType::Numeric,
            condition: condition.into(),
            condition_value: Value::from(value),
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, document: &Document) -> bool {
        let value = match document.get(&self.field) {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };
        match self.filter_type {
            FilterType::Exists => true,
            FilterType::ExactMatch => value == &self.condition_value,
            FilterType::Contains => match (value, &self.condition_value) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            FilterType::Numeric => {
                let (Some(lhs), Some(rhs)) = (value.as_f64(), self.condition_value.as_f64()) else {
                    return false;
                };
                match self.condition.as_str() {
                    "==" => lhs == rhs,
                    "!=" => lhs != rhs,
                    ">" => lhs > rhs,
                    ">=" => lhs >= rhs,
                    "<" => lhs < rhs,
                    "<=" => lhs <= rhs,
                    _ => false,
                }
            }
        }
    }
}

/// One page read request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    /// All must match.
    pub filters: Vec<Filter>,
    /// Fields to return; empty means all.
    pub select_fields: Vec<String>,
    /// Maximum documents per page.
    pub page_size: usize,
    /// Continuation token from the previous page.
    pub cursor: Option<String>,
}

impl DocumentQuery {
    /// First page of everything, `page_size` at a time.
    pub fn new(page_size: usize) -> Self {
        Self {
            filters: Vec::new(),
            select_fields: Vec::new(),
            page_size,
            cursor: None,
        }
    }

    /// Replace the filters.
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Replace the selected fields.
    pub fn with_select_fields(mut self, select_fields: Vec<String>) -> Self {
        self.select_fields = select_fields;
        self
    }
}

/// One page of documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    /// Documents of this page.
    pub documents: Vec<Document>,
    /// Token for the next page; `None` once exhausted.
    pub cursor: Option<String>,
}

/// Facet (value histogram) request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetQuery {
    /// Fields to facet.
    pub fields: Vec<String>,
    /// Buckets per page.
    pub page_size: usize,
    /// 1-based page number.
    pub page: usize,
    /// Ascending by frequency instead of descending.
    pub asc: bool,
}

/// Distinct value with its document count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetBucket {
    /// Field value.
    pub value: Value,
    /// Documents holding it.
    pub frequency: usize,
}

/// Facet results keyed by field. A field with no values is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FacetResults {
    /// Buckets per field.
    pub results: BTreeMap<String, Vec<FacetBucket>>,
}

/// Outcome of a chunked write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Documents handled, including failed ones.
    pub processed: usize,
    /// Ids of documents that were not written.
    pub failed_documents: Vec<String>,
}

impl BatchResult {
    /// Whether every document was written.
    pub fn is_success(&self) -> bool {
        self.failed_documents.is_empty()
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: BatchResult) {
        self.processed += other.processed;
        self.failed_documents.extend(other.failed_documents);
    }
}

/// Centroid registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidInsert {
    /// One document per cluster, `_id` being the cluster id.
    pub centroids: Vec<Document>,
    /// Vector fields the run clustered on.
    pub vector_fields: Vec<String>,
    /// Run alias.
    pub alias: String,
}

/// Similarity used by centroid queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Negative L1 distance.
    L1,
    /// Negative L2 distance.
    L2,
    /// Dot product.
    Dp,
}

impl SimilarityMetric {
    /// Higher is more similar.
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
            SimilarityMetric::L1 => -a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f32>(),
            SimilarityMetric::L2 => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            SimilarityMetric::Dp => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }
}

/// Caller-tunable part of a closest/furthest-to-centroid request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentroidQueryOptions {
    /// Restrict to these clusters; empty means all.
    pub cluster_ids: Vec<String>,
    /// Centroid fields to compare against; empty means the run's vector fields.
    pub centroid_vector_fields: Vec<String>,
    /// Fields to return; empty means all.
    pub select_fields: Vec<String>,
    /// Approximation level; 0 is exact.
    pub approx: usize,
    /// Sum per-field scores into one.
    pub sum_fields: bool,
    /// Documents per cluster per page.
    pub page_size: usize,
    /// 1-based page.
    pub page: usize,
    /// Similarity used for ranking.
    pub similarity_metric: SimilarityMetric,
    /// Document filters.
    pub filters: Vec<Filter>,
    /// Facet fields.
    pub facets: Vec<String>,
    /// Drop documents scoring below this.
    pub min_score: Option<f32>,
    /// Keep vector fields in results.
    pub include_vector: bool,
    /// Report cluster sizes.
    pub include_count: bool,
    /// Report facets.
    pub include_facets: bool,
    /// Hide clusters whose centroid document does not hold these values.
    pub cluster_properties_filter: Map<String, Value>,
}

impl Default for CentroidQueryOptions {
    fn default() -> Self {
        Self {
            cluster_ids: Vec::new(),
            centroid_vector_fields: Vec::new(),
            select_fields: Vec::new(),
            approx: 0,
            sum_fields: true,
            page_size: 3,
            page: 1,
            similarity_metric: SimilarityMetric::Cosine,
            filters: Vec::new(),
            facets: Vec::new(),
            min_score: None,
            include_vector: false,
            include_count: true,
            include_facets: false,
            cluster_properties_filter: Map::new(),
        }
    }
}

impl CentroidQueryOptions {
    /// Set documents per cluster.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set returned fields.
    pub fn with_select_fields(mut self, select_fields: Vec<String>) -> Self {
        self.select_fields = select_fields;
        self
    }

    /// Set the ranking similarity.
    pub fn with_similarity_metric(mut self, metric: SimilarityMetric) -> Self {
        self.similarity_metric = metric;
        self
    }
}

/// Closest/furthest-to-centroid request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CentroidQuery {
    /// Vector fields of the run.
    pub vector_fields: Vec<String>,
    /// Run alias.
    pub alias: String,
    /// Paging, ranking and filtering.
    #[serde(flatten)]
    pub options: CentroidQueryOptions,
}

/// Members returned for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMembers {
    /// Ranked documents.
    pub results: Vec<Document>,
    /// Cluster size, when requested.
    pub count: Option<usize>,
}

/// Closest/furthest results keyed by cluster id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CentroidResults {
    /// Members per cluster.
    pub results: BTreeMap<String, ClusterMembers>,
}

/// A remote collection of documents.
pub trait DocumentStore {
    /// Every field path present in the collection.
    fn schema(&self, collection: &str) -> Result<BTreeSet<String>>;

    /// One page of documents.
    fn get_documents(&self, collection: &str, query: &DocumentQuery) -> Result<DocumentPage>;

    /// Value histograms.
    fn facets(&self, collection: &str, query: &FacetQuery) -> Result<FacetResults>;

    /// Upsert documents by `_id`, `chunk_size` per request. Rejections are reported, not raised.
    fn update_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
        chunk_size: usize,
    ) -> Result<BatchResult>;

    /// Register centroids of a run.
    fn insert_centroids(&self, collection: &str, request: &CentroidInsert) -> Result<()>;

    /// Documents nearest to each centroid.
    fn nearest_to_centroid(
        &self,
        collection: &str,
        query: &CentroidQuery,
    ) -> Result<CentroidResults>;

    /// Documents furthest from each centroid.
    fn furthest_from_centroid(
        &self,
        collection: &str,
        query: &CentroidQuery,
    ) -> Result<CentroidResults>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(body: Value) -> Document {
        Document::from_value(body).unwrap()
    }

    #[test]
    fn filters() {
        let d = doc(json!({"_id": "1", "n": 5, "tags": ["a", "b"], "t": "hello", "x": null}));
        assert!(Filter::exists("n").matches(&d));
        assert!(!Filter::exists("x").matches(&d));
        assert!(!Filter::exists("missing").matches(&d));
        assert!(Filter::exact_match("_id", "1").matches(&d));
        assert!(Filter::contains("t", "ell").matches(&d));
        assert!(Filter::contains("tags", "b").matches(&d));
        assert!(Filter::numeric("n", ">=", 5.0).matches(&d));
        assert!(!Filter::numeric("n", "<", 5.0).matches(&d));
    }

    #[test]
    fn filter_wire_format() {
        let f = serde_json::to_value(Filter::exact_match("_cluster_.v.a", "cluster-1")).unwrap();
        assert_eq!(f["filter_type"], "exact_match");
        assert_eq!(f["condition_value"], "cluster-1");
    }

    #[test]
    fn similarity_orders() {
        let c = [1.0, 0.0];
        let cosine = SimilarityMetric::Cosine;
        assert!(cosine.score(&c, &[2.0, 0.0]) > cosine.score(&c, &[0.0, 1.0]));
        let l2 = SimilarityMetric::L2;
        assert!(l2.score(&c, &[1.0, 0.1]) > l2.score(&c, &[3.0, 0.0]));
        assert_eq!(SimilarityMetric::Dp.score(&c, &[3.0, 4.0]), 3.0);
    }

    #[test]
    fn batch_merge() {
        let mut a = BatchResult {
            processed: 2,
            failed_documents: vec![],
        };
        a.merge(BatchResult {
            processed: 3,
            failed_documents: vec!["x".into()],
        });
        assert_eq!(a.processed, 5);
        assert!(!a.is_success());
    }
}
