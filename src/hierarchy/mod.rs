//! Hierarchical structures produced by agglomerative clustering.
//!
//! [`Dendrogram`] records the full merge history of a fit. Flat labels are
//! cuts of that tree, either by cluster count or by linkage distance.

mod dendrogram;

pub use dendrogram::{Dendrogram, Merge};
