//! Clustering traits.

use super::label::ClusterLabel;
use crate::error::{Error, Result};
use serde_json::Value;

/// What a fitted algorithm can report besides labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// [`ClusterAlgorithm::centers`] returns the algorithm's own centers.
    pub supports_centers: bool,
    /// [`ClusterAlgorithm::centroids`] returns post-hoc member means.
    pub supports_centroids: bool,
}

/// Fit lifecycle of a stateful algorithm.
#[derive(Debug, Clone, Default)]
pub enum FitState<T> {
    /// `fit_transform` has not completed yet.
    #[default]
    Unfit,
    /// Results of the last successful `fit_transform`.
    Fit(T),
}

impl<T> FitState<T> {
    /// Borrow the fit results or fail with [`Error::NotFitted`].
    pub fn fitted(&self, algorithm: &'static str) -> Result<&T> {
        match self {
            FitState::Unfit => Err(Error::NotFitted(algorithm)),
            FitState::Fit(fit) => Ok(fit),
        }
    }

    /// Whether results are available.
    pub fn is_fit(&self) -> bool {
        matches!(self, FitState::Fit(_))
    }
}

/// A clustering strategy: vectors in, one label per vector out.
pub trait ClusterAlgorithm: Send + std::fmt::Debug {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Optional outputs this strategy provides.
    fn capabilities(&self) -> Capabilities;

    /// Fit the model to data and return cluster assignments.
    ///
    /// Returns one label per input vector, in input order.
    fn fit_transform(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ClusterLabel>>;

    /// Alias for [`ClusterAlgorithm::fit_transform`].
    fn call(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ClusterLabel>> {
        self.fit_transform(vectors)
    }

    /// Cluster centers, one per label index, ordered by label.
    fn centers(&self) -> Result<Vec<Vec<f32>>> {
        Err(Error::Unsupported {
            algorithm: self.name(),
            capability: "centers",
        })
    }

    /// Mean member vector per label, computed from the last fit.
    fn centroids(&self) -> Result<Vec<(ClusterLabel, Vec<f32>)>> {
        Err(Error::Unsupported {
            algorithm: self.name(),
            capability: "centroids",
        })
    }

    /// Parameters as JSON, for storing alongside results.
    fn metadata(&self) -> Value;
}
