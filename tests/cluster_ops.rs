use clusterops::document::parse_vector;
use clusterops::store::CentroidQueryOptions;
use clusterops::{
    pull_update_push, ClusterOps, Document, DocumentStore, Error, ErrorKind, InMemoryStore, Kmeans,
    Notices, OpsConfig, PipelineOptions, RunOptions,
};
use serde_json::json;
use std::collections::HashSet;

const GROUPS: [[f32; 2]; 3] = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];

/// Small deterministic offsets in [-0.3, 0.3].
fn jitter(i: usize) -> [f32; 2] {
    let a = ((i * 7919) % 61) as f32 / 100.0 - 0.3;
    let b = ((i * 104_729) % 61) as f32 / 100.0 - 0.3;
    [a, b]
}

fn grouped_store(per_group: usize, centers: &[[f32; 2]]) -> InMemoryStore {
    let store = InMemoryStore::new();
    let mut docs = Vec::new();
    for (g, center) in centers.iter().enumerate() {
        for i in 0..per_group {
            let [dx, dy] = jitter(g * per_group + i);
            docs.push(
                Document::from_value(json!({
                    "_id": format!("g{g}-{i}"),
                    "v": [center[0] + dx, center[1] + dy],
                    "text": format!("text {g}-{i}"),
                    "group": g,
                }))
                .unwrap(),
            );
        }
    }
    let inserted = store.insert_documents("ds", docs);
    assert!(inserted.is_success());
    store
}

fn config() -> OpsConfig {
    OpsConfig::default()
        .with_page_size(7)
        .with_update_chunk_size(4)
        .with_max_clusters(100)
        .with_cluster_field("_cluster_")
}

fn ops(store: &InMemoryStore) -> ClusterOps<'_, InMemoryStore> {
    ClusterOps::with_config(store, "ds", vec!["v".into()], config()).unwrap()
}

fn label_of(store: &InMemoryStore, id: &str, path: &str) -> String {
    store
        .document("ds", id)
        .and_then(|d| d.get(path).and_then(|v| v.as_str()).map(str::to_string))
        .unwrap()
}

fn distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn centroid_ids(centroids: &[Document]) -> Vec<String> {
    let mut ids: Vec<String> = centroids
        .iter()
        .filter_map(|c| c.id().map(str::to_string))
        .collect();
    ids.sort();
    ids
}

#[test]
fn three_groups_recovered_by_kmeans() {
    let store = grouped_store(10, &GROUPS);
    let run = ops(&store)
        .run(&mut Kmeans::new(3).with_seed(11), &RunOptions::default(), &mut Notices::new())
        .unwrap();

    assert_eq!(run.alias, "kmeans_3");
    assert_eq!(run.labels.len(), 30);
    assert!(run.write.is_success());
    assert_eq!(run.write.processed, 30);

    let mut group_labels = Vec::new();
    for g in 0..3 {
        let labels: HashSet<String> = (0..10)
            .map(|i| label_of(&store, &format!("g{g}-{i}"), &run.label_path))
            .collect();
        assert_eq!(labels.len(), 1, "group {g} split across clusters");
        group_labels.extend(labels);
    }
    let distinct: HashSet<&String> = group_labels.iter().collect();
    assert_eq!(distinct.len(), 3);

    let centroids = store.centroids("ds", &["v".to_string()], "kmeans_3");
    assert_eq!(centroids.len(), 3);
    for center in GROUPS {
        let closest = centroids
            .iter()
            .filter_map(|c| c.get("v").and_then(parse_vector))
            .map(|c| distance(&c, &center))
            .fold(f32::INFINITY, f32::min);
        assert!(closest < 0.5, "no centroid near {center:?}: {closest}");
    }

    // Writes only touched the label path.
    let doc = store.document("ds", "g1-3").unwrap();
    assert_eq!(doc.get("text"), Some(&json!("text 1-3")));
    assert_eq!(doc.get("group"), Some(&json!(1)));
}

#[test]
fn existing_alias_fails_before_any_read() {
    let store = grouped_store(5, &GROUPS[..2]);
    let mut labelled = Document::new("g0-0");
    labelled.set("_cluster_.v.kmeans_2", "cluster-0");
    store.update_documents("ds", vec![labelled], 10).unwrap();
    let updates_before = store.update_requests();

    let err = ops(&store)
        .cluster("kmeans", &json!({"k": 2}), &RunOptions::default(), &mut Notices::new())
        .unwrap_err();
    assert!(matches!(
        &err,
        Error::ResultsAlreadyExist { field } if field == "_cluster_.v.kmeans_2"
    ));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(store.read_requests(), 0);
    assert_eq!(store.update_requests(), updates_before);

    let run = ops(&store)
        .cluster(
            "kmeans",
            &json!({"k": 2, "seed": 3}),
            &RunOptions::default().overwrite(),
            &mut Notices::new(),
        )
        .unwrap();
    assert_eq!(run.labels.len(), 10);
    assert!(store.read_requests() > 0);
}

#[test]
fn unknown_algorithm_is_configuration_error() {
    let store = grouped_store(3, &GROUPS);
    let err = ops(&store)
        .cluster("optics", &json!({}), &RunOptions::default(), &mut Notices::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(store.total_requests(), 0);
}

#[test]
fn identity_pipeline_leaves_collection_unchanged() {
    let store = grouped_store(6, &GROUPS);
    let before = store.documents("ds");
    let options = PipelineOptions {
        page_size: 4,
        chunk_size: 3,
        ..PipelineOptions::default()
    };

    let result = pull_update_push(&store, "ds", |docs| docs, &options).unwrap();
    assert!(result.is_success());
    assert_eq!(result.processed, before.len());
    assert_eq!(store.documents("ds"), before);
}

#[test]
fn all_invalid_pipeline_reports_every_document() {
    let store = grouped_store(4, &GROUPS);
    let before = store.documents("ds");
    let updates_before = store.update_requests();

    let result = pull_update_push(
        &store,
        "ds",
        |mut docs| {
            for d in &mut docs {
                d.mark_invalid("rejected by transform");
            }
            docs
        },
        &PipelineOptions::default(),
    )
    .unwrap();

    assert_eq!(result.processed, 12);
    assert_eq!(result.failed_documents.len(), 12);
    assert_eq!(store.update_requests(), updates_before);
    assert_eq!(store.documents("ds"), before);
}

#[cfg(feature = "hdbscan")]
#[test]
fn hdbscan_keeps_noise_label() {
    let store = grouped_store(8, &[[0.0, 0.0], [20.0, 20.0]]);
    let outlier = Document::from_value(json!({"_id": "far", "v": [200.0, -200.0]})).unwrap();
    store.insert_documents("ds", vec![outlier]);

    let run = ops(&store)
        .cluster(
            "hdbscan",
            &json!({"min_cluster_size": 3}),
            &RunOptions::default(),
            &mut Notices::new(),
        )
        .unwrap();
    assert_eq!(run.alias, "hdbscan");
    assert_eq!(label_of(&store, "far", &run.label_path), "cluster--1");
    assert_ne!(
        label_of(&store, "g0-0", &run.label_path),
        label_of(&store, "g1-0", &run.label_path)
    );

    let ids = centroid_ids(&run.centroids);
    assert!(ids.len() >= 2);
    assert!(!ids.contains(&"cluster--1".to_string()));
}

#[cfg(feature = "hdbscan")]
#[test]
fn recomputed_centroids_skip_noise() {
    let store = grouped_store(8, &[[0.0, 0.0], [20.0, 20.0]]);
    let outlier = Document::from_value(json!({"_id": "far", "v": [200.0, -200.0]})).unwrap();
    store.insert_documents("ds", vec![outlier]);
    let run = ops(&store)
        .cluster(
            "hdbscan",
            &json!({"min_cluster_size": 3}),
            &RunOptions::default(),
            &mut Notices::new(),
        )
        .unwrap();
    assert_eq!(label_of(&store, "far", &run.label_path), "cluster--1");

    let ops = ops(&store).with_alias(run.alias.clone());
    let centroids = ops.create_centroids().unwrap();
    assert_eq!(centroid_ids(&centroids), centroid_ids(&run.centroids));
    let stored = store.centroids("ds", &["v".to_string()], &run.alias);
    assert!(!centroid_ids(&stored).contains(&"cluster--1".to_string()));

    let closest = ops.list_closest(CentroidQueryOptions::default()).unwrap();
    assert!(!closest.results.contains_key("cluster--1"));
}

#[test]
fn two_vector_fields_share_one_label_path() {
    let store = grouped_store(6, &GROUPS[..2]);
    let mut extra = Vec::new();
    for doc in store.documents("ds") {
        let group = doc.get("group").and_then(|g| g.as_u64()).unwrap();
        let mut update = Document::new(doc.id().unwrap());
        update.set("b", json!([group as f32 * 10.0]));
        extra.push(update);
    }
    store.update_documents("ds", extra, 50).unwrap();
    let partial = Document::from_value(json!({"_id": "only-a", "v": [0.0, 0.0]})).unwrap();
    store.insert_documents("ds", vec![partial]);

    let fields = vec!["v".to_string(), "b".to_string()];
    let ops = ClusterOps::with_config(&store, "ds", fields, config()).unwrap();
    let run = ops
        .run(&mut Kmeans::new(2).with_seed(4), &RunOptions::default(), &mut Notices::new())
        .unwrap();

    assert_eq!(run.label_path, "_cluster_.v.b.kmeans_2");
    assert_eq!(run.labels.len(), 12);
    assert!(!run.document_ids.contains(&"only-a".to_string()));
    assert!(!store.document("ds", "only-a").unwrap().contains(&run.label_path));
    assert_ne!(
        label_of(&store, "g0-0", &run.label_path),
        label_of(&store, "g1-0", &run.label_path)
    );

    let stored = store.centroids("ds", &["v".to_string(), "b".to_string()], "kmeans_2");
    assert_eq!(stored.len(), 2);
    for centroid in &stored {
        let v = centroid.get("v").and_then(parse_vector).unwrap();
        let b = centroid.get("b").and_then(parse_vector).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(b.len(), 1);
        let group = if b[0] < 5.0 { 0 } else { 1 };
        assert!(distance(&v, &GROUPS[group]) < 0.5);
        assert!((b[0] - group as f32 * 10.0).abs() < 1e-4);
    }
}

#[cfg(feature = "hierarchical")]
#[test]
fn hierarchical_registers_member_means() {
    let store = grouped_store(5, &GROUPS[1..]);
    let mut notices = Notices::new();
    let run = ops(&store)
        .cluster("agglomerative", &json!({"n_clusters": 2}), &RunOptions::default(), &mut notices)
        .unwrap();
    assert_eq!(run.alias, "hierarchical_2");
    assert_eq!(run.centroids.len(), 2);
    for centroid in &run.centroids {
        let c = centroid.get("v").and_then(parse_vector).unwrap();
        assert!(GROUPS[1..].iter().any(|g| distance(&c, g) < 0.5));
    }
}

#[cfg(feature = "hierarchical")]
#[test]
fn hierarchical_without_stopping_rule_warns_once() {
    let store = grouped_store(3, &GROUPS);
    let mut notices = Notices::new();
    ops(&store)
        .cluster(
            "hierarchical",
            &json!({"linkage": "single"}),
            &RunOptions::default(),
            &mut notices,
        )
        .unwrap();
    assert!(notices.seen("hierarchical.no_stopping_rule"));
}

#[test]
fn explanations_written_only_to_closest_documents() {
    let store = grouped_store(5, &[[10.0, 1.0], [1.0, 10.0]]);
    let run = ops(&store)
        .run(&mut Kmeans::new(2).with_seed(5), &RunOptions::default(), &mut Notices::new())
        .unwrap();
    let ops = ops(&store).with_alias(run.alias);

    let explained = ops
        .explain_text_clusters("text", |query, answer| json!(format!("{query}->{answer}")), 2, None)
        .unwrap();
    assert_eq!(explained.closest.results.len(), 2);
    assert_eq!(explained.write.processed, 4);

    let annotated: Vec<Document> = store
        .documents("ds")
        .into_iter()
        .filter(|d| d.contains("_explain_.text"))
        .collect();
    assert_eq!(annotated.len(), 4);
    for doc in &annotated {
        let note = doc.get("_explain_.text").and_then(|v| v.as_str()).unwrap();
        let own = doc.get("text").and_then(|v| v.as_str()).unwrap();
        assert!(note.ends_with(&format!("->{own}")), "{note}");
    }
}

#[test]
fn explain_skips_singleton_clusters() {
    let store = grouped_store(4, &[[10.0, 1.0], [1.0, 10.0]]);
    let run = ops(&store)
        .run(&mut Kmeans::new(2).with_seed(5), &RunOptions::default(), &mut Notices::new())
        .unwrap();
    let explained = ops(&store)
        .with_alias(run.alias)
        .explain_text_clusters("text", |_, _| json!("x"), 1, Some("notes"))
        .unwrap();
    assert_eq!(explained.write.processed, 0);
    assert!(store.documents("ds").iter().all(|d| !d.contains("notes")));
}

#[test]
fn wraparound_facets_terminate() {
    let store = InMemoryStore::new().with_facet_wraparound(true);
    let docs = (0..9)
        .map(|i| {
            let mut d = Document::new(format!("d{i}"));
            d.set("_cluster_.v.run", format!("cluster-{}", i % 3));
            d
        })
        .collect();
    store.insert_documents("ds", docs);

    let ops = ClusterOps::with_config(&store, "ds", vec!["v".into()], config().with_max_clusters(2))
        .unwrap()
        .with_alias("run");
    let mut ids = ops.list_cluster_ids(None, 0, 50).unwrap();
    ids.sort();
    assert_eq!(ids, vec!["cluster-0", "cluster-1", "cluster-2"]);
    assert!(store.total_requests() <= 3);
}

#[test]
fn list_cluster_ids_applies_minimum_size() {
    let store = InMemoryStore::new();
    let docs = (0..7)
        .map(|i| {
            let mut d = Document::new(format!("d{i}"));
            d.set("_cluster_.v.run", if i < 5 { "cluster-0" } else { "cluster-1" });
            d
        })
        .collect();
    store.insert_documents("ds", docs);
    let ops = ops(&store).with_alias("run");

    assert_eq!(ops.list_cluster_ids(None, 2, 10).unwrap(), vec!["cluster-0"]);
    assert_eq!(ops.list_cluster_ids(None, 0, 1).unwrap().len(), 1);
    let requests = store.total_requests();
    assert!(ops.list_cluster_ids(None, 0, 0).unwrap().is_empty());
    assert_eq!(store.total_requests(), requests);
}

#[test]
fn operate_across_clusters_sees_empty_clusters() {
    let store = InMemoryStore::new();
    let docs = (0..6)
        .map(|i| {
            let mut d = Document::new(format!("d{i}"));
            if i < 4 {
                d.set("_cluster_.v.run", "cluster-0");
                d.set("score", i);
            } else {
                d.set("_cluster_.v.run", "cluster-1");
            }
            d
        })
        .collect();
    store.insert_documents("ds", docs);

    let sums = ops(&store)
        .with_alias("run")
        .operate_across_clusters("score", |values| {
            values.iter().filter_map(|v| v.as_i64()).sum::<i64>()
        })
        .unwrap();
    assert_eq!(sums.len(), 2);
    assert_eq!(sums["cluster-0"], 6);
    assert_eq!(sums["cluster-1"], 0);
}

#[test]
fn closest_and_furthest_rank_members() {
    let store = grouped_store(5, &[[10.0, 1.0], [1.0, 10.0]]);
    let run = ops(&store)
        .run(&mut Kmeans::new(2).with_seed(2), &RunOptions::default(), &mut Notices::new())
        .unwrap();
    let ops = ops(&store).with_alias(run.alias);

    let options = CentroidQueryOptions::default().with_page_size(5);
    let closest = ops.list_closest(options.clone()).unwrap();
    let furthest = ops.list_furthest(options).unwrap();
    for (cluster, members) in &closest.results {
        assert_eq!(members.count, Some(5));
        let mut near: Vec<&str> = members.results.iter().filter_map(Document::id).collect();
        let far_members = &furthest.results[cluster].results;
        let mut far: Vec<&str> = far_members.iter().filter_map(Document::id).collect();
        near.sort();
        far.sort();
        assert_eq!(near, far);
        assert!(members.results.iter().all(|d| !d.contains("v")));
    }

    let texts = ops
        .operate_on_closest(
            "text",
            |values| values.len(),
            CentroidQueryOptions::default().with_page_size(2),
        )
        .unwrap();
    assert!(texts.values().all(|&n| n == 2));
}

#[test]
fn create_centroids_recomputes_means() {
    let store = grouped_store(6, &GROUPS[..2]);
    let run = ops(&store)
        .run(&mut Kmeans::new(2).with_seed(9), &RunOptions::default(), &mut Notices::new())
        .unwrap();
    assert_eq!(run.centroids.len(), 2);

    let centroids = ops(&store).with_alias(run.alias.clone()).create_centroids().unwrap();
    assert_eq!(centroids.len(), 2);
    assert_eq!(store.centroids("ds", &["v".to_string()], &run.alias).len(), 2);
    for center in &GROUPS[..2] {
        assert!(centroids
            .iter()
            .filter_map(|c| c.get("v").and_then(parse_vector))
            .any(|c| distance(&c, center) < 0.5));
    }

    let two_fields = ClusterOps::with_config(&store, "ds", vec!["v".into(), "w".into()], config())
        .unwrap()
        .with_alias("any");
    assert!(matches!(
        two_fields.create_centroids(),
        Err(Error::TooManyVectorFields { operation: "create_centroids", max: 1, found: 2 })
    ));
}
