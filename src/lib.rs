//! # clusterops
//!
//! Vector clustering of documents held in a remote document store, with the
//! results written back to the store.
//!
//! - [`cluster`]: clustering strategies behind [`ClusterAlgorithm`], plus a
//!   name-keyed registry.
//! - [`binder`]: documents to vectors, labels back to documents.
//! - [`ops`]: the [`ClusterOps`] orchestrator (fetch, cluster, write back,
//!   register centroids) and cluster introspection.
//! - [`pipeline`]: paged pull-update-push over a whole collection.
//! - [`store`]: the [`DocumentStore`] seam and an in-memory implementation.
//!
//! HDBSCAN and hierarchical clustering sit behind the default `hdbscan` and
//! `hierarchical` features; `parallel` turns on rayon in k-means assignment.
//!
//! ```
//! use clusterops::{ClusterOps, Document, InMemoryStore, Notices, OpsConfig, RunOptions};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! let docs = (0..6)
//!     .map(|i| {
//!         let x = if i < 3 { 0.0 } else { 5.0 };
//!         Document::from_value(json!({"_id": format!("doc-{i}"), "emb": [x, x]})).unwrap()
//!     })
//!     .collect();
//! store.insert_documents("films", docs);
//!
//! let ops = ClusterOps::with_config(&store, "films", vec!["emb".into()], OpsConfig::default())?;
//! let params = json!({"k": 2, "seed": 7});
//! let run = ops.cluster("kmeans", &params, &RunOptions::default(), &mut Notices::new())?;
//! assert_eq!(run.label_path, "_cluster_.emb.kmeans_2");
//! assert_eq!(store.centroids("films", &["emb".to_string()], "kmeans_2").len(), 2);
//! # Ok::<(), clusterops::Error>(())
//! ```

pub mod binder;
pub mod cluster;
pub mod config;
pub mod document;
/// Error types used across `clusterops`.
pub mod error;
pub mod hierarchy;
pub mod notice;
pub mod ops;
pub mod pipeline;
pub mod store;

pub use binder::{FieldLengthMap, FitOptions, MissingPolicy};
pub use cluster::{Capabilities, ClusterAlgorithm, ClusterLabel, Kmeans, MiniBatchKmeans};
#[cfg(feature = "hdbscan")]
pub use cluster::Hdbscan;
#[cfg(feature = "hierarchical")]
pub use cluster::{HierarchicalClustering, Linkage};
pub use config::OpsConfig;
pub use document::Document;
pub use error::{Error, ErrorKind, Result};
pub use hierarchy::Dendrogram;
pub use notice::Notices;
pub use ops::{ClusterOps, ClusterRun, RunOptions};
pub use pipeline::{pull_all, pull_update_push, PipelineOptions};
pub use store::{BatchResult, DocumentStore, Filter, InMemoryStore};
