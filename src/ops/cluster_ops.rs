//! The clustering orchestrator.
//!
//! A run pulls every document holding the vector fields, clusters them in
//! memory, writes one label per document under
//! `<cluster_field>.<field>[.<field>...].<alias>`, and registers one centroid
//! per non-noise label. Introspection reads labels back through facets and the
//! store's centroid queries.

use crate::binder::{self, labelled_centroid_documents, MissingPolicy};
use crate::cluster::{mean_by_label, registry, ClusterAlgorithm, ClusterLabel};
use crate::config::OpsConfig;
use crate::document::{field_across_documents, parse_vector, vector_value, Document, ID_FIELD};
use crate::error::{Error, Result};
use crate::notice::Notices;
use crate::pipeline::pull_all;
use crate::store::{
    BatchResult, CentroidInsert, CentroidQuery, CentroidQueryOptions, CentroidResults,
    DocumentQuery, DocumentStore, FacetQuery, Filter,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Stages of one clustering run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RunStage {
    Configured,
    Fetched,
    Clustered,
    WrittenBack,
    CentroidsRegistered,
}

impl RunStage {
    fn as_str(self) -> &'static str {
        match self {
            RunStage::Configured => "configured",
            RunStage::Fetched => "fetched",
            RunStage::Clustered => "clustered",
            RunStage::WrittenBack => "written_back",
            RunStage::CentroidsRegistered => "centroids_registered",
        }
    }

    fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Configured => Some(RunStage::Fetched),
            RunStage::Fetched => Some(RunStage::Clustered),
            RunStage::Clustered => Some(RunStage::WrittenBack),
            RunStage::WrittenBack => Some(RunStage::CentroidsRegistered),
            RunStage::CentroidsRegistered => None,
        }
    }
}

struct StageLog<'a> {
    dataset_id: &'a str,
    alias: &'a str,
    stage: RunStage,
}

impl<'a> StageLog<'a> {
    fn start(dataset_id: &'a str, alias: &'a str) -> Self {
        tracing::debug!(dataset_id, alias, stage = RunStage::Configured.as_str(), "cluster run");
        Self {
            dataset_id,
            alias,
            stage: RunStage::Configured,
        }
    }

    fn advance(&mut self, to: RunStage) {
        debug_assert_eq!(self.stage.next(), Some(to), "stage skipped");
        self.stage = to;
        tracing::info!(
            dataset_id = self.dataset_id,
            alias = self.alias,
            stage = to.as_str(),
            "cluster run"
        );
    }
}

/// Options of [`ClusterOps::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Replace labels already stored under the same alias.
    pub overwrite: bool,
    /// Cluster only documents matching these, on top of the vector-field `exists` filters.
    pub filters: Vec<Filter>,
}

impl RunOptions {
    /// Allow replacing existing labels.
    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// Add document filters.
    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct ClusterRun {
    /// Alias the labels were written under.
    pub alias: String,
    /// Full dot-path of the labels.
    pub label_path: String,
    /// Ids of the clustered documents.
    pub document_ids: Vec<String>,
    /// Label per clustered document.
    pub labels: Vec<ClusterLabel>,
    /// Registered centroid documents.
    pub centroids: Vec<Document>,
    /// Outcome of the label write-back.
    pub write: BatchResult,
    /// Algorithm parameters.
    pub metadata: Value,
}

/// Clustering operations over one collection and set of vector fields.
pub struct ClusterOps<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    dataset_id: String,
    vector_fields: Vec<String>,
    alias: Option<String>,
    config: OpsConfig,
}

impl<'s, S: DocumentStore + ?Sized> ClusterOps<'s, S> {
    /// Bind to `dataset_id` and `vector_fields` with configuration from the environment.
    pub fn new(
        store: &'s S,
        dataset_id: impl Into<String>,
        vector_fields: Vec<String>,
    ) -> Result<Self> {
        Self::with_config(store, dataset_id, vector_fields, OpsConfig::from_env())
    }

    /// Bind with an explicit configuration.
    pub fn with_config(
        store: &'s S,
        dataset_id: impl Into<String>,
        vector_fields: Vec<String>,
        config: OpsConfig,
    ) -> Result<Self> {
        if vector_fields.is_empty() {
            return Err(Error::invalid_parameter("vector_fields", "must not be empty"));
        }
        if let Some(bad) = vector_fields.iter().find(|f| f.is_empty()) {
            return Err(Error::invalid_parameter(
                "vector_fields",
                format!("invalid field name '{bad}'"),
            ));
        }
        config.validate()?;
        Ok(Self {
            store,
            dataset_id: dataset_id.into(),
            vector_fields,
            alias: None,
            config,
        })
    }

    /// Name the run; without one, runs derive it from the algorithm (`kmeans_8`).
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Collection id.
    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// Vector fields clustered on.
    pub fn vector_fields(&self) -> &[String] {
        &self.vector_fields
    }

    /// Alias, if set.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Configuration in use.
    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    /// Label path for `alias` under the configured cluster field.
    pub fn label_path(&self, alias: &str) -> String {
        binder::label_path(&self.config.cluster_field, &self.vector_fields, alias)
    }

    pub(crate) fn store(&self) -> &'s S {
        self.store
    }

    pub(crate) fn require_alias(&self) -> Result<&str> {
        self.alias
            .as_deref()
            .ok_or_else(|| Error::Config("an alias is required for this operation".to_string()))
    }

    /// Build `name` from the registry and [`run`](Self::run) it.
    pub fn cluster(
        &self,
        name: &str,
        params: &Value,
        options: &RunOptions,
        notices: &mut Notices,
    ) -> Result<ClusterRun> {
        let mut algorithm = registry::build(name, params, notices)?;
        self.run(algorithm.as_mut(), options, notices)
    }

    /// Fetch, cluster, write labels back and register centroids.
    ///
    /// Fails with [`Error::ResultsAlreadyExist`] before reading any document
    /// when the label path is already in the schema and `overwrite` is off.
    pub fn run(
        &self,
        algorithm: &mut dyn ClusterAlgorithm,
        options: &RunOptions,
        notices: &mut Notices,
    ) -> Result<ClusterRun> {
        let alias = self
            .alias
            .clone()
            .unwrap_or_else(|| default_alias(algorithm));
        let path = self.label_path(&alias);
        let mut stage = StageLog::start(&self.dataset_id, &alias);

        if !options.overwrite && self.store.schema(&self.dataset_id)?.contains(&path) {
            return Err(Error::ResultsAlreadyExist { field: path });
        }

        notices.info_once(
            "cluster_ops.fetch",
            "fetching all documents with vectors; large collections may take a while",
        );
        let mut filters: Vec<Filter> = self.vector_fields.iter().map(Filter::exists).collect();
        filters.extend(options.filters.iter().cloned());
        let mut select_fields = vec![ID_FIELD.to_string()];
        select_fields.extend(self.vector_fields.iter().cloned());
        let query = DocumentQuery::new(self.config.page_size)
            .with_filters(filters)
            .with_select_fields(select_fields);
        let documents = pull_all(self.store, &self.dataset_id, &query)?;
        stage.advance(RunStage::Fetched);

        let extraction = binder::extract(&self.vector_fields, &documents, MissingPolicy::Skip)?;
        if extraction.is_empty() {
            return Err(Error::EmptyInput);
        }
        let document_ids = extraction
            .indices
            .iter()
            .map(|&i| {
                let doc = &documents[i];
                doc.id().map(str::to_string).ok_or_else(|| Error::MissingField {
                    id: doc.display_id().to_string(),
                    field: ID_FIELD.to_string(),
                })
            })
            .collect::<Result<Vec<String>>>()?;
        let labels = algorithm.fit_transform(&extraction.vectors)?;
        stage.advance(RunStage::Clustered);

        let mut updates: Vec<Document> = document_ids.iter().map(Document::new).collect();
        binder::write_labels(&mut updates, &path, &labels)?;
        let write = self
            .store
            .update_documents(&self.dataset_id, updates, self.config.update_chunk_size)?;
        if !write.is_success() {
            tracing::warn!(
                dataset_id = %self.dataset_id,
                failed = write.failed_documents.len(),
                "some labels were not written"
            );
        }
        stage.advance(RunStage::WrittenBack);

        let capabilities = algorithm.capabilities();
        let layout = &extraction.field_lengths;
        let centroids = if capabilities.supports_centers {
            binder::centroid_documents(&algorithm.centers()?, layout)?
        } else if capabilities.supports_centroids {
            labelled_centroid_documents(&algorithm.centroids()?, layout)?
        } else {
            labelled_centroid_documents(&mean_by_label(&extraction.vectors, &labels)?, layout)?
        };
        if centroids.is_empty() {
            notices.warn_once(
                "cluster_ops.no_centroids",
                "every document is noise; no centroids registered",
            );
        } else {
            self.store.insert_centroids(
                &self.dataset_id,
                &CentroidInsert {
                    centroids: centroids.clone(),
                    vector_fields: self.vector_fields.clone(),
                    alias: alias.clone(),
                },
            )?;
        }
        stage.advance(RunStage::CentroidsRegistered);

        Ok(ClusterRun {
            metadata: algorithm.metadata(),
            alias,
            label_path: path,
            document_ids,
            labels,
            centroids,
            write,
        })
    }

    /// Recompute centroids as member means of the stored labels and register them.
    ///
    /// Supports exactly one vector field. Noise gets no centroid.
    pub fn create_centroids(&self) -> Result<Vec<Document>> {
        let [field] = self.vector_fields.as_slice() else {
            return Err(Error::TooManyVectorFields {
                operation: "create_centroids",
                max: 1,
                found: self.vector_fields.len(),
            });
        };
        let alias = self.require_alias()?;

        let means = self.operate_across_clusters(field, mean_of_values)?;
        let centroids: Vec<Document> = means
            .into_iter()
            .filter(|(id, _)| !id.parse::<ClusterLabel>().is_ok_and(ClusterLabel::is_noise))
            .filter_map(|(id, mean)| {
                let mean = mean?;
                let mut doc = Document::new(id);
                doc.set(field, vector_value(&mean));
                Some(doc)
            })
            .collect();

        self.store.insert_centroids(
            &self.dataset_id,
            &CentroidInsert {
                centroids: centroids.clone(),
                vector_fields: self.vector_fields.clone(),
                alias: alias.to_string(),
            },
        )?;
        tracing::info!(
            dataset_id = %self.dataset_id,
            alias,
            centroids = centroids.len(),
            "centroids created"
        );
        Ok(centroids)
    }

    /// Distinct cluster ids of a run, read from label facets.
    ///
    /// Only ids seen on more than `minimum_cluster_size` documents are kept, at
    /// most `num_clusters` of them. Paging stops early once a facet page brings
    /// no value not seen before, since the remote may start over from page 1.
    pub fn list_cluster_ids(
        &self,
        alias: Option<&str>,
        minimum_cluster_size: usize,
        num_clusters: usize,
    ) -> Result<Vec<String>> {
        let alias = match alias {
            Some(a) => a,
            None => self.require_alias()?,
        };
        let field = self.label_path(alias);

        let mut seen: HashSet<String> = HashSet::new();
        let mut ids: Vec<String> = Vec::new();
        let mut page = 1;
        while ids.len() < num_clusters {
            let facets = self.store.facets(
                &self.dataset_id,
                &FacetQuery {
                    fields: vec![field.clone()],
                    page_size: self.config.max_clusters,
                    page,
                    asc: true,
                },
            )?;
            let Some(buckets) = facets.results.get(&field) else {
                return Err(Error::MissingCluster {
                    alias: alias.to_string(),
                    field,
                });
            };
            if buckets.is_empty() {
                break;
            }

            let mut unseen = false;
            for bucket in buckets {
                let id = match &bucket.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !seen.insert(id.clone()) {
                    continue;
                }
                unseen = true;
                if bucket.frequency > minimum_cluster_size && ids.len() < num_clusters {
                    ids.push(id);
                }
            }
            if !unseen {
                break;
            }
            page += 1;
        }
        tracing::debug!(alias, pages = page, ids = ids.len(), "listed cluster ids");
        Ok(ids)
    }

    fn centroid_query(&self, options: CentroidQueryOptions) -> Result<CentroidQuery> {
        Ok(CentroidQuery {
            vector_fields: self.vector_fields.clone(),
            alias: self.require_alias()?.to_string(),
            options,
        })
    }

    /// Documents closest to each centroid.
    pub fn list_closest(&self, options: CentroidQueryOptions) -> Result<CentroidResults> {
        let query = self.centroid_query(options)?;
        self.store.nearest_to_centroid(&self.dataset_id, &query)
    }

    /// Documents furthest from each centroid.
    pub fn list_furthest(&self, options: CentroidQueryOptions) -> Result<CentroidResults> {
        let query = self.centroid_query(options)?;
        self.store.furthest_from_centroid(&self.dataset_id, &query)
    }

    /// Apply `func` to the values of `field` across the members of each cluster.
    ///
    /// Clusters come from `list_cluster_ids(None, 0, max_clusters)`. A cluster
    /// without documents holding `field` gets `func(&[])`.
    pub fn operate_across_clusters<T, F>(
        &self,
        field: &str,
        mut func: F,
    ) -> Result<BTreeMap<String, T>>
    where
        F: FnMut(&[Value]) -> T,
    {
        let alias = self.require_alias()?;
        let path = self.label_path(alias);
        let ids = self.list_cluster_ids(None, 0, self.config.max_clusters)?;

        let mut out = BTreeMap::new();
        for id in ids {
            let query = DocumentQuery::new(self.config.page_size)
                .with_filters(vec![Filter::exact_match(&path, id.as_str()), Filter::exists(field)])
                .with_select_fields(vec![field.to_string()]);
            let members = pull_all(self.store, &self.dataset_id, &query)?;
            let values = field_across_documents(field, &members);
            out.insert(id, func(&values));
        }
        Ok(out)
    }

    /// Apply `func` to the values of `field` across the closest documents of each cluster.
    pub fn operate_on_closest<T, F>(
        &self,
        field: &str,
        mut func: F,
        options: CentroidQueryOptions,
    ) -> Result<BTreeMap<String, T>>
    where
        F: FnMut(&[Value]) -> T,
    {
        let closest = self.list_closest(options.with_select_fields(vec![field.to_string()]))?;
        Ok(closest
            .results
            .into_iter()
            .map(|(id, members)| {
                let values = field_across_documents(field, &members.results);
                (id, func(&values))
            })
            .collect())
    }
}

fn default_alias(algorithm: &dyn ClusterAlgorithm) -> String {
    let metadata = algorithm.metadata();
    let k = ["k", "n_clusters"]
        .iter()
        .find_map(|key| metadata.get(*key).and_then(Value::as_u64));
    match k {
        Some(k) => format!("{}_{k}", algorithm.name()),
        None => algorithm.name().to_string(),
    }
}

/// Mean of every numeric vector in `values`; `None` when there is none.
fn mean_of_values(values: &[Value]) -> Option<Vec<f32>> {
    let vectors: Vec<Vec<f32>> = values.iter().filter_map(parse_vector).collect();
    let labels = vec![ClusterLabel::Cluster(0); vectors.len()];
    mean_by_label(&vectors, &labels)
        .ok()?
        .into_iter()
        .next()
        .map(|(_, mean)| mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Kmeans;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let docs = (0..6)
            .map(|i| {
                let x = if i < 3 { 0.0 } else { 10.0 };
                Document::from_value(json!({"_id": format!("d{i}"), "v": [x, x], "n": i})).unwrap()
            })
            .collect();
        store.insert_documents("ds", docs);
        store
    }

    fn fields() -> Vec<String> {
        vec!["v".to_string()]
    }

    #[test]
    fn requires_vector_fields() {
        let store = store();
        assert!(ClusterOps::with_config(&store, "ds", vec![], OpsConfig::default()).is_err());
    }

    #[test]
    fn default_alias_uses_k() {
        let store = store();
        let ops = ClusterOps::with_config(&store, "ds", fields(), OpsConfig::default()).unwrap();
        let run = ops
            .run(&mut Kmeans::new(2).with_seed(1), &RunOptions::default(), &mut Notices::new())
            .unwrap();
        assert_eq!(run.alias, "kmeans_2");
        assert_eq!(run.label_path, "_cluster_.v.kmeans_2");
        assert_eq!(run.centroids.len(), 2);
        assert!(run.write.is_success());
    }

    #[test]
    fn create_centroids_rejects_multiple_fields() {
        let store = store();
        let ops = ClusterOps::with_config(
            &store,
            "ds",
            vec!["v".into(), "w".into()],
            OpsConfig::default(),
        )
        .unwrap()
        .with_alias("a");
        assert!(matches!(
            ops.create_centroids(),
            Err(Error::TooManyVectorFields { max: 1, found: 2, .. })
        ));
        assert_eq!(store.total_requests(), 0);
    }

    #[test]
    fn missing_labels_are_reported() {
        let store = store();
        let ops = ClusterOps::with_config(&store, "ds", fields(), OpsConfig::default())
            .unwrap()
            .with_alias("never_ran");
        assert!(matches!(
            ops.list_cluster_ids(None, 0, 10),
            Err(Error::MissingCluster { .. })
        ));
    }

    #[test]
    fn mean_of_values_ignores_non_vectors() {
        let values = vec![json!([0.0, 2.0]), json!("text"), json!([2.0, 4.0])];
        assert_eq!(mean_of_values(&values), Some(vec![1.0, 3.0]));
        assert_eq!(mean_of_values(&[]), None);
    }

    /// Serves pages with `_id` removed, like a remote returning malformed rows.
    struct IdlessStore(InMemoryStore);

    impl DocumentStore for IdlessStore {
        fn schema(&self, collection: &str) -> Result<std::collections::BTreeSet<String>> {
            self.0.schema(collection)
        }

        fn get_documents(
            &self,
            collection: &str,
            query: &DocumentQuery,
        ) -> Result<crate::store::DocumentPage> {
            let mut page = self.0.get_documents(collection, query)?;
            for doc in &mut page.documents {
                doc.remove(ID_FIELD);
            }
            Ok(page)
        }

        fn facets(
            &self,
            collection: &str,
            query: &FacetQuery,
        ) -> Result<crate::store::FacetResults> {
            self.0.facets(collection, query)
        }

        fn update_documents(
            &self,
            collection: &str,
            documents: Vec<Document>,
            chunk_size: usize,
        ) -> Result<BatchResult> {
            self.0.update_documents(collection, documents, chunk_size)
        }

        fn insert_centroids(&self, collection: &str, request: &CentroidInsert) -> Result<()> {
            self.0.insert_centroids(collection, request)
        }

        fn nearest_to_centroid(
            &self,
            collection: &str,
            query: &CentroidQuery,
        ) -> Result<CentroidResults> {
            self.0.nearest_to_centroid(collection, query)
        }

        fn furthest_from_centroid(
            &self,
            collection: &str,
            query: &CentroidQuery,
        ) -> Result<CentroidResults> {
            self.0.furthest_from_centroid(collection, query)
        }
    }

    #[test]
    fn documents_without_id_are_not_written() {
        let store = IdlessStore(store());
        let ops = ClusterOps::with_config(&store, "ds", fields(), OpsConfig::default()).unwrap();
        let err = ops
            .run(&mut Kmeans::new(2).with_seed(1), &RunOptions::default(), &mut Notices::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field, .. } if field == ID_FIELD));
        assert_eq!(store.0.update_requests(), 0);
        assert!(store.0.document("ds", "<unknown>").is_none());
    }
}
