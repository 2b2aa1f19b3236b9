//! Strategy lookup by name.
//!
//! Each entry deserializes its own parameter struct from JSON, so callers can
//! configure any strategy from a serialized request:
//!
//! ```
//! use clusterops::cluster::registry;
//! use clusterops::notice::Notices;
//! use serde_json::json;
//!
//! let params = json!({"k": 3, "seed": 7});
//! let model = registry::build("kmeans", &params, &mut Notices::new()).unwrap();
//! assert_eq!(model.name(), "kmeans");
//! ```

use super::kmeans::{Kmeans, KmeansParams};
use super::minibatch::{MiniBatchKmeans, MiniBatchKmeansParams};
use super::traits::ClusterAlgorithm;
use crate::error::{Error, Result};
use crate::notice::Notices;
use serde::de::DeserializeOwned;
use serde_json::Value;

type Constructor = fn(&Value, &mut Notices) -> Result<Box<dyn ClusterAlgorithm>>;

enum Entry {
    Available(Constructor),
    /// Compiled out; the string is the cargo feature that provides it.
    #[allow(dead_code)]
    Disabled(&'static str),
}

const REGISTRY: &[(&str, Entry)] = &[
    ("kmeans", Entry::Available(kmeans)),
    ("minibatchkmeans", Entry::Available(minibatch_kmeans)),
    ("mini-batch-kmeans", Entry::Available(minibatch_kmeans)),
    #[cfg(feature = "hdbscan")]
    ("hdbscan", Entry::Available(hdbscan)),
    #[cfg(not(feature = "hdbscan"))]
    ("hdbscan", Entry::Disabled("hdbscan")),
    #[cfg(feature = "hierarchical")]
    ("hierarchical", Entry::Available(hierarchical)),
    #[cfg(feature = "hierarchical")]
    ("agglomerative", Entry::Available(hierarchical)),
    #[cfg(not(feature = "hierarchical"))]
    ("hierarchical", Entry::Disabled("hierarchical")),
    #[cfg(not(feature = "hierarchical"))]
    ("agglomerative", Entry::Disabled("hierarchical")),
];

/// Construct the strategy registered under `name` (case-insensitive).
///
/// `params` is a JSON object of that strategy's parameters; `null` means
/// all defaults.
pub fn build(
    name: &str,
    params: &Value,
    notices: &mut Notices,
) -> Result<Box<dyn ClusterAlgorithm>> {
    let key = name.trim().to_ascii_lowercase();
    let entry = REGISTRY
        .iter()
        .find(|(n, _)| *n == key)
        .map(|(_, e)| e)
        .ok_or_else(|| Error::UnknownAlgorithm(name.to_string()))?;
    match entry {
        Entry::Available(construct) => construct(params, notices),
        Entry::Disabled(feature) => Err(Error::FeatureUnavailable {
            algorithm: key,
            feature,
        }),
    }
}

/// Every registered name, including compiled-out ones.
pub fn algorithm_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|(n, _)| *n).collect()
}

fn parse<P: DeserializeOwned + Default>(params: &Value) -> Result<P> {
    if params.is_null() {
        return Ok(P::default());
    }
    Ok(serde_json::from_value(params.clone())?)
}

fn kmeans(params: &Value, _: &mut Notices) -> Result<Box<dyn ClusterAlgorithm>> {
    let params: KmeansParams = parse(params)?;
    Ok(Box::new(Kmeans::from_params(&params)?))
}

fn minibatch_kmeans(params: &Value, _: &mut Notices) -> Result<Box<dyn ClusterAlgorithm>> {
    let params: MiniBatchKmeansParams = parse(params)?;
    Ok(Box::new(MiniBatchKmeans::from_params(&params)?))
}

#[cfg(feature = "hdbscan")]
fn hdbscan(params: &Value, _: &mut Notices) -> Result<Box<dyn ClusterAlgorithm>> {
    use super::hdbscan::{Hdbscan, HdbscanParams};
    let params: HdbscanParams = parse(params)?;
    Ok(Box::new(Hdbscan::from_params(&params)?))
}

#[cfg(feature = "hierarchical")]
fn hierarchical(params: &Value, notices: &mut Notices) -> Result<Box<dyn ClusterAlgorithm>> {
    use super::hierarchical::{HierarchicalClustering, HierarchicalParams};
    let params: HierarchicalParams = parse(params)?;
    Ok(Box::new(HierarchicalClustering::from_params(&params, notices)?))
}
