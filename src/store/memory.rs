//! In-memory [`DocumentStore`].
//!
//! Holds collections in a `parking_lot::RwLock`, keeps insertion order, and
//! behaves like the remote where the clustering core depends on it:
//!
//! - cursor pagination over filtered documents,
//! - updates merge into existing documents by `_id` (upsert),
//! - documents without a string `_id` or holding `null` anywhere are rejected
//!   and reported in [`BatchResult::failed_documents`],
//! - centroid queries rank members of `label_path(cluster_field, fields, alias)`.
//!
//! Every call is counted so tests can assert what was (not) requested.

use super::{
    BatchResult, CentroidInsert, CentroidQuery, CentroidResults, ClusterMembers, DocumentPage,
    DocumentQuery, DocumentStore, FacetBucket, FacetQuery, FacetResults,
};
use crate::binder::label_path;
use crate::config::DEFAULT_CLUSTER_FIELD;
use crate::document::Document;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    index: HashMap<String, usize>,
    /// Keyed by label path of the run.
    centroids: HashMap<String, Vec<Document>>,
}

impl Collection {
    fn upsert(&mut self, id: String, document: Document) {
        match self.index.get(&id) {
            Some(&i) => {
                let mut merged = std::mem::take(&mut self.documents[i]).into_map();
                merge_objects(&mut merged, document.into_map());
                self.documents[i] = Document::from_map(merged);
            }
            None => {
                self.index.insert(id, self.documents.len());
                self.documents.push(document);
            }
        }
    }

    fn matching<'a>(
        &'a self,
        filters: &'a [super::Filter],
    ) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents
            .iter()
            .filter(move |d| filters.iter().all(|f| f.matches(d)))
    }
}

/// Call counters of an [`InMemoryStore`].
#[derive(Debug, Default)]
struct Counters {
    schema: AtomicUsize,
    reads: AtomicUsize,
    facets: AtomicUsize,
    updates: AtomicUsize,
    centroid_calls: AtomicUsize,
}

/// Thread-safe in-memory document store.
#[derive(Debug)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    cluster_field: String,
    facet_wraparound: bool,
    counters: Counters,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            cluster_field: DEFAULT_CLUSTER_FIELD.to_string(),
            facet_wraparound: false,
            counters: Counters::default(),
        }
    }

    /// Root of label paths used by centroid queries.
    pub fn with_cluster_field(mut self, cluster_field: impl Into<String>) -> Self {
        self.cluster_field = cluster_field.into();
        self
    }

    /// Serve facet pages past the end by starting over from page 1.
    pub fn with_facet_wraparound(mut self, wraparound: bool) -> Self {
        self.facet_wraparound = wraparound;
        self
    }

    /// Insert or merge documents; same validation as [`DocumentStore::update_documents`].
    pub fn insert_documents(&self, collection: &str, documents: Vec<Document>) -> BatchResult {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        write_all(target, documents)
    }

    /// Snapshot of a collection in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Document by id.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let collections = self.collections.read();
        let c = collections.get(collection)?;
        c.index.get(id).map(|&i| c.documents[i].clone())
    }

    /// Centroids registered for a run.
    pub fn centroids(
        &self,
        collection: &str,
        vector_fields: &[String],
        alias: &str,
    ) -> Vec<Document> {
        let key = label_path(&self.cluster_field, vector_fields, alias);
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.centroids.get(&key).cloned())
            .unwrap_or_default()
    }

    /// `get_documents` calls so far.
    pub fn read_requests(&self) -> usize {
        self.counters.reads.load(Ordering::Relaxed)
    }

    /// `update_documents` calls so far.
    pub fn update_requests(&self) -> usize {
        self.counters.updates.load(Ordering::Relaxed)
    }

    /// Every call so far.
    pub fn total_requests(&self) -> usize {
        [
            &self.counters.schema,
            &self.counters.reads,
            &self.counters.facets,
            &self.counters.updates,
            &self.counters.centroid_calls,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }

    fn rank(
        &self,
        collection: &str,
        query: &CentroidQuery,
        nearest: bool,
    ) -> Result<CentroidResults> {
        self.counters.centroid_calls.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.read();
        let Some(c) = collections.get(collection) else {
            return Ok(CentroidResults::default());
        };
        let path = label_path(&self.cluster_field, &query.vector_fields, &query.alias);
        let Some(centroids) = c.centroids.get(&path) else {
            return Err(Error::Store(format!(
                "no centroids registered for '{path}' in '{collection}'"
            )));
        };
        let fields = if query.options.centroid_vector_fields.is_empty() {
            &query.vector_fields
        } else {
            &query.options.centroid_vector_fields
        };
        let page = query.options.page.max(1);

        let mut results = BTreeMap::new();
        for centroid in centroids {
            let Some(cluster_id) = centroid.id() else {
                continue;
            };
            let wanted = &query.options.cluster_ids;
            if !wanted.is_empty() && !wanted.iter().any(|id| id == cluster_id) {
                continue;
            }
            if !query
                .options
                .cluster_properties_filter
                .iter()
                .all(|(k, v)| centroid.get(k) == Some(v))
            {
                continue;
            }

            let members: Vec<&Document> = c
                .matching(&query.options.filters)
                .filter(|d| d.get(&path).and_then(Value::as_str) == Some(cluster_id))
                .collect();
            let count = members.len();

            let mut scored: Vec<(f32, &Document)> = members
                .into_iter()
                .filter_map(|d| score(d, centroid, fields, query).map(|s| (s, d)))
                .filter(|(s, _)| query.options.min_score.map_or(true, |m| *s >= m))
                .collect();
            scored.sort_by(|a, b| if nearest { b.0.total_cmp(&a.0) } else { a.0.total_cmp(&b.0) });

            let documents = scored
                .into_iter()
                .skip((page - 1) * query.options.page_size)
                .take(query.options.page_size)
                .map(|(_, d)| present(d, query))
                .collect();
            results.insert(
                cluster_id.to_string(),
                ClusterMembers {
                    results: documents,
                    count: query.options.include_count.then_some(count),
                },
            );
        }
        Ok(CentroidResults { results })
    }
}

impl DocumentStore for InMemoryStore {
    fn schema(&self, collection: &str) -> Result<BTreeSet<String>> {
        self.counters.schema.fetch_add(1, Ordering::Relaxed);
        let collections = self.collections.read();
        let mut schema = BTreeSet::new();
        for doc in collections.get(collection).map(|c| c.documents.as_slice()).unwrap_or_default() {
            for leaf in doc.leaf_paths() {
                let mut prefix = String::new();
                for segment in leaf.split('.') {
                    if !prefix.is_empty() {
                        prefix.push('.');
                    }
                    prefix.push_str(segment);
                    schema.insert(prefix.clone());
                }
            }
        }
        Ok(schema)
    }

    fn get_documents(&self, collection: &str, query: &DocumentQuery) -> Result<DocumentPage> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        if query.page_size == 0 {
            return Err(Error::invalid_parameter("page_size", "must be at least 1"));
        }
        let offset = match &query.cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| Error::Store(format!("invalid cursor '{c}'")))?,
        };

        let collections = self.collections.read();
        let Some(c) = collections.get(collection) else {
            return Ok(DocumentPage::default());
        };
        let mut matching = c.matching(&query.filters).skip(offset);
        let documents: Vec<Document> = matching
            .by_ref()
            .take(query.page_size)
            .map(|d| {
                if query.select_fields.is_empty() {
                    d.clone()
                } else {
                    d.project(&query.select_fields)
                }
            })
            .collect();
        let next = offset + documents.len();
        let cursor = matching.next().map(|_| next.to_string());
        Ok(DocumentPage { documents, cursor })
    }

    fn facets(&self, collection: &str, query: &FacetQuery) -> Result<FacetResults> {
        self.counters.facets.fetch_add(1, Ordering::Relaxed);
        if query.page_size == 0 {
            return Err(Error::invalid_parameter("page_size", "must be at least 1"));
        }
        let collections = self.collections.read();
        let Some(c) = collections.get(collection) else {
            return Ok(FacetResults::default());
        };

        let mut results = BTreeMap::new();
        for field in &query.fields {
            let mut counts: BTreeMap<String, (Value, usize)> = BTreeMap::new();
            for value in c.documents.iter().filter_map(|d| d.get(field)) {
                if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    continue;
                }
                counts
                    .entry(value.to_string())
                    .or_insert_with(|| (value.clone(), 0))
                    .1 += 1;
            }
            if counts.is_empty() {
                continue;
            }

            let mut buckets: Vec<FacetBucket> = counts
                .into_values()
                .map(|(value, frequency)| FacetBucket { value, frequency })
                .collect();
            // Stable sort keeps value order among equal frequencies.
            if query.asc {
                buckets.sort_by_key(|b| b.frequency);
            } else {
                buckets.sort_by_key(|b| std::cmp::Reverse(b.frequency));
            }

            let n_pages = buckets.len().div_ceil(query.page_size);
            let mut page = query.page.max(1);
            if self.facet_wraparound && page > n_pages {
                page = (page - 1) % n_pages + 1;
            }
            let page: Vec<FacetBucket> = buckets
                .into_iter()
                .skip((page - 1) * query.page_size)
                .take(query.page_size)
                .collect();
            results.insert(field.clone(), page);
        }
        Ok(FacetResults { results })
    }

    fn update_documents(
        &self,
        collection: &str,
        documents: Vec<Document>,
        chunk_size: usize,
    ) -> Result<BatchResult> {
        if chunk_size == 0 {
            return Err(Error::invalid_parameter("chunk_size", "must be at least 1"));
        }
        let mut total = BatchResult::default();
        let mut documents = documents.into_iter().peekable();
        while documents.peek().is_some() {
            self.counters.updates.fetch_add(1, Ordering::Relaxed);
            let chunk: Vec<Document> = documents.by_ref().take(chunk_size).collect();
            let mut collections = self.collections.write();
            let target = collections.entry(collection.to_string()).or_default();
            total.merge(write_all(target, chunk));
        }
        Ok(total)
    }

    fn insert_centroids(&self, collection: &str, request: &CentroidInsert) -> Result<()> {
        self.counters.centroid_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(bad) = request.centroids.iter().find(|c| c.id().is_none()) {
            return Err(Error::Store(format!(
                "centroid without string _id: {}",
                serde_json::to_string(bad)?
            )));
        }
        let key = label_path(&self.cluster_field, &request.vector_fields, &request.alias);
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .centroids
            .insert(key, request.centroids.clone());
        Ok(())
    }

    fn nearest_to_centroid(
        &self,
        collection: &str,
        query: &CentroidQuery,
    ) -> Result<CentroidResults> {
        self.rank(collection, query, true)
    }

    fn furthest_from_centroid(
        &self,
        collection: &str,
        query: &CentroidQuery,
    ) -> Result<CentroidResults> {
        self.rank(collection, query, false)
    }
}

fn write_all(target: &mut Collection, documents: Vec<Document>) -> BatchResult {
    let mut result = BatchResult::default();
    for doc in documents {
        result.processed += 1;
        let Some(id) = doc.id().map(str::to_string) else {
            tracing::debug!("rejected document without string _id");
            result.failed_documents.push(doc.display_id().to_string());
            continue;
        };
        if doc.fields().values().any(contains_null) {
            tracing::debug!(id = %id, "rejected document holding null");
            result.failed_documents.push(id);
            continue;
        }
        target.upsert(id, doc);
    }
    result
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(contains_null),
        Value::Object(map) => map.values().any(contains_null),
        _ => false,
    }
}

fn merge_objects(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_objects(existing, incoming)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn score(
    document: &Document,
    centroid: &Document,
    fields: &[String],
    query: &CentroidQuery,
) -> Option<f32> {
    let mut scores = Vec::with_capacity(fields.len());
    for field in fields {
        let v = document.vector(field).ok()??;
        let c = centroid.vector(field).ok()??;
        if v.len() != c.len() {
            return None;
        }
        scores.push(query.options.similarity_metric.score(&v, &c));
    }
    if query.options.sum_fields {
        Some(scores.iter().sum())
    } else {
        scores.into_iter().reduce(f32::max)
    }
}

fn present(document: &Document, query: &CentroidQuery) -> Document {
    let mut out = if query.options.select_fields.is_empty() {
        document.clone()
    } else {
        document.project(&query.options.select_fields)
    };
    if !query.options.include_vector {
        for field in &query.vector_fields {
            out.remove(field);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CentroidQueryOptions, Filter};
    use serde_json::json;

    fn doc(body: Value) -> Document {
        Document::from_value(body).unwrap()
    }

    fn seeded(n: usize) -> InMemoryStore {
        let store = InMemoryStore::new();
        let docs = (0..n)
            .map(|i| doc(json!({"_id": i.to_string(), "v": [i as f64, 0.0], "even": i % 2 == 0})))
            .collect();
        assert!(store.insert_documents("c", docs).is_success());
        store
    }

    #[test]
    fn cursor_pagination() {
        let store = seeded(5);
        let mut query = DocumentQuery::new(2);
        let mut seen = Vec::new();
        loop {
            let page = store.get_documents("c", &query).unwrap();
            seen.extend(page.documents.iter().map(|d| d.id().unwrap().to_string()));
            match page.cursor {
                Some(c) => query.cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(store.read_requests(), 3);
    }

    #[test]
    fn filtered_and_projected_reads() {
        let store = seeded(4);
        let query = DocumentQuery::new(10)
            .with_filters(vec![Filter::exact_match("even", true)])
            .with_select_fields(vec!["_id".into()]);
        let page = store.get_documents("c", &query).unwrap();
        assert_eq!(page.documents.len(), 2);
        assert!(page.documents[0].get("v").is_none());
    }

    #[test]
    fn rejects_null_and_missing_id() {
        let store = InMemoryStore::new();
        let result = store
            .update_documents(
                "c",
                vec![
                    doc(json!({"_id": "ok", "v": [1.0]})),
                    doc(json!({"_id": "nan", "v": [null, 1.0]})),
                    doc(json!({"v": [1.0]})),
                ],
                2,
            )
            .unwrap();
        assert_eq!(result.processed, 3);
        assert_eq!(result.failed_documents, vec!["nan".to_string(), "<unknown>".to_string()]);
        assert_eq!(store.update_requests(), 2);
        assert_eq!(store.documents("c").len(), 1);
    }

    #[test]
    fn updates_merge_nested() {
        let store = InMemoryStore::new();
        store.insert_documents("c", vec![doc(json!({"_id": "1", "a": {"x": 1}}))]);
        store.insert_documents("c", vec![doc(json!({"_id": "1", "a": {"y": 2}}))]);
        let d = store.document("c", "1").unwrap();
        assert_eq!(d.get("a.x"), Some(&json!(1)));
        assert_eq!(d.get("a.y"), Some(&json!(2)));
        let schema = store.schema("c").unwrap();
        assert!(schema.contains("a") && schema.contains("a.y"));
    }

    #[test]
    fn facet_pages_and_wraparound() {
        let store = InMemoryStore::new().with_facet_wraparound(true);
        let docs = ["x", "x", "x", "y", "y", "z"]
            .iter()
            .enumerate()
            .map(|(i, v)| doc(json!({"_id": i.to_string(), "l": v})))
            .collect();
        store.insert_documents("c", docs);

        let mut query = FacetQuery {
            fields: vec!["l".into(), "absent".into()],
            page_size: 2,
            page: 1,
            asc: false,
        };
        let first = store.facets("c", &query).unwrap();
        assert!(!first.results.contains_key("absent"));
        assert_eq!(first.results["l"][0], FacetBucket { value: json!("x"), frequency: 3 });

        query.page = 3;
        let wrapped = store.facets("c", &query).unwrap();
        assert_eq!(wrapped.results["l"], first.results["l"]);
    }

    #[test]
    fn nearest_and_furthest() {
        let store = InMemoryStore::new();
        let docs = (0..4)
            .map(|i| {
                doc(json!({
                    "_id": i.to_string(),
                    "v": [1.0, i as f64],
                    "_cluster_": {"v": {"a": "cluster-0"}}
                }))
            })
            .collect();
        store.insert_documents("c", docs);
        store
            .insert_centroids(
                "c",
                &CentroidInsert {
                    centroids: vec![doc(json!({"_id": "cluster-0", "v": [1.0, 0.0]}))],
                    vector_fields: vec!["v".into()],
                    alias: "a".into(),
                },
            )
            .unwrap();

        let query = CentroidQuery {
            vector_fields: vec!["v".into()],
            alias: "a".into(),
            options: CentroidQueryOptions::default().with_page_size(2),
        };
        let near = store.nearest_to_centroid("c", &query).unwrap();
        let members = &near.results["cluster-0"];
        assert_eq!(members.count, Some(4));
        assert_eq!(members.results[0].id(), Some("0"));
        assert!(members.results[0].get("v").is_none());

        let far = store.furthest_from_centroid("c", &query).unwrap();
        assert_eq!(far.results["cluster-0"].results[0].id(), Some("3"));
    }
}
