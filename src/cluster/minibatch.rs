//! Mini-batch k-means (Sculley, 2010).
//!
//! Each iteration samples `batch_size` rows, assigns them to the nearest
//! center and moves that center toward the row with a per-center learning
//! rate `1 / count`. A smoothed batch inertia drives early stopping after
//! `max_no_improvement` iterations without progress. Labels come from one
//! final full assignment pass, so `centers()[k]` is the center of label `k`.

use super::kmeans::{assign, init_centroids, make_rng, nearest, to_array, KmeansInit};
use super::label::ClusterLabel;
use super::traits::{Capabilities, ClusterAlgorithm, FitState};
use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Serializable mini-batch k-means parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiniBatchKmeansParams {
    /// Number of clusters.
    #[serde(alias = "n_clusters")]
    pub k: usize,
    /// Initialization strategy name.
    pub init: String,
    /// Rows per batch.
    pub batch_size: usize,
    /// Maximum batches.
    pub max_iter: usize,
    /// Stop after this many batches without inertia improvement.
    pub max_no_improvement: usize,
    /// Stop once the squared center shift of a batch is at most this (0 disables).
    pub tol: f64,
    /// Random seed.
    #[serde(alias = "random_state")]
    pub seed: Option<u64>,
}

impl Default for MiniBatchKmeansParams {
    fn default() -> Self {
        Self {
            k: 10,
            init: KmeansInit::KmeansPlusPlus.as_str().to_string(),
            batch_size: 1024,
            max_iter: 100,
            max_no_improvement: 2,
            tol: 0.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
struct MiniBatchFit {
    centers: Array2<f32>,
    inertia: f32,
    n_batches: usize,
}

/// Mini-batch k-means clustering.
#[derive(Debug, Clone)]
pub struct MiniBatchKmeans {
    params: MiniBatchKmeansParams,
    init: KmeansInit,
    state: FitState<MiniBatchFit>,
}

impl MiniBatchKmeans {
    /// Create with `k` clusters and default parameters.
    pub fn new(k: usize) -> Self {
        Self {
            params: MiniBatchKmeansParams {
                k,
                ..Default::default()
            },
            init: KmeansInit::KmeansPlusPlus,
            state: FitState::Unfit,
        }
    }

    /// Build from serialized parameters.
    pub fn from_params(params: &MiniBatchKmeansParams) -> Result<Self> {
        let init = params.init.parse()?;
        let model = Self {
            params: params.clone(),
            init,
            state: FitState::Unfit,
        };
        model.validate()?;
        Ok(model)
    }

    /// Set rows per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.params.batch_size = batch_size;
        self
    }

    /// Set maximum batches.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.params.max_iter = max_iter;
        self
    }

    /// Set early-stopping patience.
    pub fn with_max_no_improvement(mut self, patience: usize) -> Self {
        self.params.max_no_improvement = patience;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = Some(seed);
        self
    }

    /// Batches processed by the last fit.
    pub fn n_batches(&self) -> Result<usize> {
        Ok(self.state.fitted("minibatchkmeans")?.n_batches)
    }

    /// Full-data inertia of the last fit.
    pub fn inertia(&self) -> Result<f32> {
        Ok(self.state.fitted("minibatchkmeans")?.inertia)
    }

    fn validate(&self) -> Result<()> {
        let p = &self.params;
        if p.k == 0 {
            return Err(Error::invalid_parameter("k", "must be at least 1"));
        }
        if p.batch_size == 0 {
            return Err(Error::invalid_parameter("batch_size", "must be at least 1"));
        }
        if p.max_iter == 0 {
            return Err(Error::invalid_parameter("max_iter", "must be at least 1"));
        }
        if p.tol.is_nan() || p.tol < 0.0 {
            return Err(Error::invalid_parameter("tol", "must be non-negative"));
        }
        Ok(())
    }
}

impl ClusterAlgorithm for MiniBatchKmeans {
    fn name(&self) -> &'static str {
        "minibatchkmeans"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_centers: true,
            supports_centroids: false,
        }
    }

    fn fit_transform(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ClusterLabel>> {
        self.validate()?;
        let data = to_array(vectors)?;
        let n = data.nrows();
        let d = data.ncols();
        let k = self.params.k;
        if k > n {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: n,
            });
        }

        let mut rng = make_rng(self.params.seed);
        let mut centers = init_centroids(self.init, k, &data, &mut *rng);
        let mut counts = vec![0usize; k];

        let batch_size = self.params.batch_size.min(n);
        let alpha = (2.0 * batch_size as f64 / (n as f64 + 1.0)).min(1.0);
        let mut ewa_inertia: Option<f64> = None;
        let mut best_inertia = f64::INFINITY;
        let mut no_improvement = 0usize;
        let mut n_batches = 0usize;

        for _ in 0..self.params.max_iter {
            n_batches += 1;
            let batch = rand::seq::index::sample(&mut *rng, n, batch_size);
            let previous = centers.clone();
            let mut batch_inertia = 0.0f64;

            for idx in batch.iter() {
                let row = data.row(idx);
                let (c, dist) = nearest(&row, &centers);
                batch_inertia += dist as f64;
                counts[c] += 1;
                let eta = 1.0 / counts[c] as f32;
                for j in 0..d {
                    centers[[c, j]] = (1.0 - eta) * centers[[c, j]] + eta * row[j];
                }
            }
            batch_inertia /= batch_size as f64;

            let ewa = match ewa_inertia {
                None => batch_inertia,
                Some(prev) => prev * (1.0 - alpha) + batch_inertia * alpha,
            };
            ewa_inertia = Some(ewa);

            let shift: f64 = previous
                .iter()
                .zip(centers.iter())
                .map(|(a, b)| ((a - b) as f64).powi(2))
                .sum();
            if self.params.tol > 0.0 && shift <= self.params.tol {
                tracing::debug!(n_batches, shift, "minibatch kmeans converged on center shift");
                break;
            }

            if ewa < best_inertia {
                best_inertia = ewa;
                no_improvement = 0;
            } else {
                no_improvement += 1;
                if self.params.max_no_improvement > 0
                    && no_improvement >= self.params.max_no_improvement
                {
                    tracing::debug!(n_batches, "minibatch kmeans stopped: no inertia improvement");
                    break;
                }
            }
        }

        let mut labels = vec![0usize; n];
        let inertia = assign(&data, &centers, &mut labels);
        self.state = FitState::Fit(MiniBatchFit {
            centers,
            inertia,
            n_batches,
        });
        Ok(labels.into_iter().map(ClusterLabel::Cluster).collect())
    }

    fn centers(&self) -> Result<Vec<Vec<f32>>> {
        let fit = self.state.fitted("minibatchkmeans")?;
        Ok(fit.centers.rows().into_iter().map(|r| r.to_vec()).collect())
    }

    fn metadata(&self) -> Value {
        json!({
            "algorithm": self.name(),
            "k": self.params.k,
            "init": self.init.as_str(),
            "batch_size": self.params.batch_size,
            "max_iter": self.params.max_iter,
            "max_no_improvement": self.params.max_no_improvement,
            "tol": self.params.tol,
            "seed": self.params.seed,
            "number_of_clusters": self.params.k,
        })
    }
}
