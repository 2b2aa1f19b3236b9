//! Hierarchical (agglomerative) clustering.
//!
//! Bottom-up clustering that builds a **dendrogram** by iteratively
//! merging the closest clusters. Flat labels are a cut of that tree:
//! either at a fixed cluster count or at a linkage distance.
//!
//! # Linkage Methods
//!
//! | Linkage | Formula | Effect |
//! |---------|---------|--------|
//! | Single | min(d(a,b)) for a∈A, b∈B | Chaining; elongated clusters |
//! | Complete | max(d(a,b)) | Compact, spherical clusters |
//! | Average | mean(d(a,b)) | Balanced compromise |
//! | Ward | Δ variance | Minimizes within-cluster variance |
//!
//! Ward merges the pair whose union increases within-cluster variance least:
//!
//! ```text
//! Δ(A,B) = (nₐ × nᵦ)/(nₐ + nᵦ) × ||μₐ - μᵦ||²
//! ```
//!
//! and is only defined for euclidean distances.
//!
//! # Stopping rule
//!
//! Exactly one of `n_clusters` and `distance_threshold` drives the cut. When
//! neither is given the threshold is 0, so every point is its own cluster;
//! when both are given `n_clusters` is forced to 10 and the threshold dropped.
//! Both cases emit a one-time warning through [`Notices`].
//!
//! The algorithm has no centers; [`ClusterAlgorithm::centroids`] returns
//! member means of the last fit.

use super::label::ClusterLabel;
use super::traits::{Capabilities, ClusterAlgorithm, FitState};
use super::util::{self, Metric};
use crate::error::{Error, Result};
use crate::hierarchy::Dendrogram;
use crate::notice::Notices;
use kodama::{linkage as kodama_linkage, Method as KodamaMethod};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

/// Cluster count forced when both stopping rules are supplied.
pub const FORCED_N_CLUSTERS: usize = 10;

/// Linkage method for hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum distance between clusters.
    Single,
    /// Maximum distance between clusters.
    Complete,
    /// Mean distance between clusters.
    Average,
    /// Minimize within-cluster variance.
    #[default]
    Ward,
}

impl Linkage {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
            Linkage::Ward => "ward",
        }
    }

    fn method(self) -> KodamaMethod {
        match self {
            Linkage::Single => KodamaMethod::Single,
            Linkage::Complete => KodamaMethod::Complete,
            Linkage::Average => KodamaMethod::Average,
            Linkage::Ward => KodamaMethod::Ward,
        }
    }
}

impl FromStr for Linkage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Linkage::Single),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            "ward" => Ok(Linkage::Ward),
            other => Err(Error::invalid_parameter(
                "linkage",
                format!("unsupported linkage '{other}'"),
            )),
        }
    }
}

/// Serializable hierarchical clustering parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchicalParams {
    /// Number of clusters to cut to.
    pub n_clusters: Option<usize>,
    /// Merge only pairs closer than this.
    pub distance_threshold: Option<f64>,
    /// Linkage method.
    pub linkage: Linkage,
    /// Point distance.
    #[serde(alias = "metric")]
    pub affinity: Metric,
}

/// Stopping rule after resolving the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cut {
    /// Cut to this many clusters.
    Count(usize),
    /// Apply merges strictly below this distance.
    Distance(f64),
}

impl HierarchicalParams {
    /// Resolve the stopping rule, warning once per caller on fallbacks.
    pub fn resolve(&self, notices: &mut Notices) -> Result<Cut> {
        let cut = match (self.n_clusters, self.distance_threshold) {
            (Some(k), None) => Cut::Count(k),
            (None, Some(t)) => Cut::Distance(t),
            (None, None) => {
                notices.warn_once(
                    "hierarchical.no_stopping_rule",
                    "hierarchical: neither n_clusters nor distance_threshold given, using distance_threshold = 0",
                );
                Cut::Distance(0.0)
            }
            (Some(_), Some(_)) => {
                notices.warn_once(
                    "hierarchical.both_stopping_rules",
                    "hierarchical: n_clusters and distance_threshold are exclusive, using n_clusters = 10",
                );
                Cut::Count(FORCED_N_CLUSTERS)
            }
        };
        match cut {
            Cut::Count(0) => Err(Error::invalid_parameter("n_clusters", "must be at least 1")),
            Cut::Distance(t) if t.is_nan() || t < 0.0 => Err(Error::invalid_parameter(
                "distance_threshold",
                "must be non-negative",
            )),
            _ => Ok(cut),
        }
    }
}

#[derive(Debug, Clone)]
struct HierarchicalFit {
    vectors: Vec<Vec<f32>>,
    labels: Vec<ClusterLabel>,
    dendrogram: Dendrogram,
}

/// Hierarchical (agglomerative) clustering.
#[derive(Debug, Clone)]
pub struct HierarchicalClustering {
    cut: Cut,
    linkage: Linkage,
    affinity: Metric,
    state: FitState<HierarchicalFit>,
}

impl HierarchicalClustering {
    /// Cut to `n_clusters` with ward linkage.
    pub fn new(n_clusters: usize) -> Self {
        Self {
            cut: Cut::Count(n_clusters),
            linkage: Linkage::Ward,
            affinity: Metric::Euclidean,
            state: FitState::Unfit,
        }
    }

    /// Build from serialized parameters.
    pub fn from_params(params: &HierarchicalParams, notices: &mut Notices) -> Result<Self> {
        let model = Self {
            cut: params.resolve(notices)?,
            linkage: params.linkage,
            affinity: params.affinity,
            state: FitState::Unfit,
        };
        model.validate()?;
        Ok(model)
    }

    /// Cut at a linkage distance instead of a count.
    pub fn with_distance_threshold(mut self, threshold: f64) -> Self {
        self.cut = Cut::Distance(threshold);
        self
    }

    /// Set linkage method.
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Set point distance.
    pub fn with_affinity(mut self, affinity: Metric) -> Self {
        self.affinity = affinity;
        self
    }

    /// Resolved stopping rule.
    pub fn cut(&self) -> Cut {
        self.cut
    }

    /// Merge history of the last fit.
    pub fn dendrogram(&self) -> Result<&Dendrogram> {
        Ok(&self.state.fitted("hierarchical")?.dendrogram)
    }

    fn validate(&self) -> Result<()> {
        if self.linkage == Linkage::Ward && self.affinity != Metric::Euclidean {
            return Err(Error::invalid_parameter(
                "affinity",
                format!("ward linkage requires euclidean, got '{}'", self.affinity.as_str()),
            ));
        }
        Ok(())
    }

    /// Fit and return the full dendrogram.
    pub fn fit_dendrogram(&self, data: &[Vec<f32>]) -> Result<Dendrogram> {
        self.validate()?;
        util::check_vectors(data)?;
        let n = data.len();

        // Condensed upper triangle, row-major: n choose 2 entries.
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for row in 0..n.saturating_sub(1) {
            for col in (row + 1)..n {
                condensed.push(self.affinity.distance(&data[row], &data[col]) as f64);
            }
        }

        let mut dendrogram = Dendrogram::new(n);
        if n > 1 {
            // kodama labels leaves 0..n and merge i as n + i.
            let steps = kodama_linkage(&mut condensed, n, self.linkage.method());
            for step in steps.steps() {
                dendrogram.add_merge(step.cluster1, step.cluster2, step.dissimilarity, step.size);
            }
        }
        Ok(dendrogram)
    }
}

impl ClusterAlgorithm for HierarchicalClustering {
    fn name(&self) -> &'static str {
        "hierarchical"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_centers: false,
            supports_centroids: true,
        }
    }

    fn fit_transform(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ClusterLabel>> {
        let dendrogram = self.fit_dendrogram(vectors)?;
        let flat = match self.cut {
            Cut::Count(k) => {
                if k > vectors.len() {
                    return Err(Error::InvalidClusterCount {
                        requested: k,
                        n_items: vectors.len(),
                    });
                }
                dendrogram.cut_to_k(k)
            }
            Cut::Distance(t) => dendrogram.cut_at_distance(t),
        };
        let labels: Vec<ClusterLabel> = flat.into_iter().map(ClusterLabel::Cluster).collect();
        tracing::debug!(
            n = vectors.len(),
            merges = dendrogram.n_merges(),
            linkage = self.linkage.as_str(),
            "hierarchical fit"
        );
        self.state = FitState::Fit(HierarchicalFit {
            vectors: vectors.to_vec(),
            labels: labels.clone(),
            dendrogram,
        });
        Ok(labels)
    }

    fn centroids(&self) -> Result<Vec<(ClusterLabel, Vec<f32>)>> {
        let fit = self.state.fitted("hierarchical")?;
        util::mean_by_label(&fit.vectors, &fit.labels)
    }

    fn metadata(&self) -> Value {
        let (n_clusters, distance_threshold) = match self.cut {
            Cut::Count(k) => (Some(k), None),
            Cut::Distance(t) => (None, Some(t)),
        };
        json!({
            "algorithm": self.name(),
            "n_clusters": n_clusters,
            "distance_threshold": distance_threshold,
            "linkage": self.linkage.as_str(),
            "affinity": self.affinity.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 10.1],
        ]
    }

    #[test]
    fn two_pairs() {
        let mut hc = HierarchicalClustering::new(2);
        let labels = hc.fit_transform(&pairs()).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn centroids_are_member_means() {
        let mut hc = HierarchicalClustering::new(2).with_linkage(Linkage::Average);
        let labels = hc.fit_transform(&pairs()).unwrap();
        let centroids = hc.centroids().unwrap();
        assert_eq!(centroids.len(), 2);
        let (_, low) = centroids.iter().find(|(l, _)| *l == labels[0]).unwrap();
        assert!((low[0] - 0.05).abs() < 1e-6);
        assert!(hc.centers().is_err());
    }

    #[test]
    fn dendrogram_after_fit() {
        let mut hc = HierarchicalClustering::new(2);
        assert!(matches!(hc.dendrogram(), Err(Error::NotFitted(_))));
        hc.fit_transform(&[vec![0.0, 0.0], vec![1.0, 0.0], vec![10.0, 0.0]])
            .unwrap();
        let d = hc.dendrogram().unwrap();
        assert_eq!(d.n_items(), 3);
        assert_eq!(d.n_merges(), 2);
    }

    #[test]
    fn distance_threshold_cut() {
        let mut hc = HierarchicalClustering::new(1)
            .with_linkage(Linkage::Single)
            .with_distance_threshold(1.0);
        let labels = hc.fit_transform(&pairs()).unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[1], labels[2]);

        let mut zero = HierarchicalClustering::new(1).with_distance_threshold(0.0);
        let labels = zero.fit_transform(&pairs()).unwrap();
        let distinct: std::collections::HashSet<_> = labels.iter().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn stopping_rule_resolution() {
        let mut notices = Notices::default();
        let neither = HierarchicalParams::default();
        assert_eq!(neither.resolve(&mut notices).unwrap(), Cut::Distance(0.0));

        let both = HierarchicalParams {
            n_clusters: Some(3),
            distance_threshold: Some(2.0),
            ..Default::default()
        };
        assert_eq!(both.resolve(&mut notices).unwrap(), Cut::Count(FORCED_N_CLUSTERS));
        assert!(notices.seen("hierarchical.both_stopping_rules"));
    }

    #[test]
    fn ward_requires_euclidean() {
        let params = HierarchicalParams {
            n_clusters: Some(2),
            affinity: Metric::Cosine,
            ..Default::default()
        };
        assert!(HierarchicalClustering::from_params(&params, &mut Notices::default()).is_err());

        let average = HierarchicalParams {
            linkage: Linkage::Average,
            ..params
        };
        assert!(HierarchicalClustering::from_params(&average, &mut Notices::default()).is_ok());
    }
}
