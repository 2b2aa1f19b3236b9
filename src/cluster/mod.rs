//! Clustering algorithms for grouping document vectors.
//!
//! Every strategy implements [`ClusterAlgorithm`]: vectors in, one
//! [`ClusterLabel`] per vector out. What else a fitted strategy can report is
//! advertised by [`Capabilities`] rather than by a type hierarchy.
//!
//! | Strategy | Centers | Centroids | Noise | Feature |
//! |----------|---------|-----------|-------|---------|
//! | [`Kmeans`] | yes | no | no | always |
//! | [`MiniBatchKmeans`] | yes | no | no | always |
//! | `Hdbscan` | no | no | yes | `hdbscan` |
//! | `HierarchicalClustering` | no | member means | no | `hierarchical` |
//!
//! ## K-means
//!
//! Assign each point to the nearest center, move each center to the mean of
//! its points, repeat. Minimizes within-cluster sum of squares:
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} ||x - μ_k||²
//! ```
//!
//! Assumes roughly spherical clusters of similar size and a known k.
//! [`MiniBatchKmeans`] trades a little quality for speed on large inputs.
//!
//! ## HDBSCAN
//!
//! Density based: finds clusters of varying density without k and marks
//! sparse points as [`ClusterLabel::Noise`].
//!
//! ## Hierarchical
//!
//! Agglomerative merges recorded in a [`Dendrogram`](crate::hierarchy::Dendrogram),
//! cut by cluster count or linkage distance.
//!
//! ## By name
//!
//! [`registry::build`] constructs any strategy from its name and JSON
//! parameters.
//!
//! ```rust
//! use clusterops::cluster::{ClusterAlgorithm, Kmeans};
//!
//! let data = vec![
//!     vec![0.0, 0.0], vec![0.1, 0.1],
//!     vec![10.0, 10.0], vec![10.1, 10.1],
//! ];
//! let mut kmeans = Kmeans::new(2).with_seed(42);
//! let labels = kmeans.fit_transform(&data).unwrap();
//! assert_eq!(labels[0], labels[1]);
//! assert_ne!(labels[0], labels[2]);
//! ```

#[cfg(feature = "hdbscan")]
mod hdbscan;
#[cfg(feature = "hierarchical")]
mod hierarchical;
mod kmeans;
mod label;
mod minibatch;
pub mod registry;
mod traits;
pub(crate) mod util;

#[cfg(feature = "hdbscan")]
pub use hdbscan::{Hdbscan, HdbscanParams};
#[cfg(feature = "hierarchical")]
pub use hierarchical::{Cut, HierarchicalClustering, HierarchicalParams, Linkage};
pub use kmeans::{Kmeans, KmeansInit, KmeansParams};
pub use label::{ClusterLabel, ParseLabelError};
pub use minibatch::{MiniBatchKmeans, MiniBatchKmeansParams};
pub use traits::{Capabilities, ClusterAlgorithm, FitState};
pub use util::{mean_by_label, Metric};
