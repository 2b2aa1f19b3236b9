//! Clustering runs against a remote collection, and introspection of their results.
//!
//! [`ClusterOps`] is bound to one collection, one set of vector fields and
//! (optionally) one alias. A run walks fixed stages: configured, fetched,
//! clustered, written back, centroids registered. It fails fast, before any
//! document is read, on bad configuration or when results would be
//! overwritten without `overwrite`.

mod cluster_ops;
mod explain;

pub use cluster_ops::{ClusterOps, ClusterRun, RunOptions};
pub use explain::{ExplainedClusters, DEFAULT_EXPLAIN_FIELD};
