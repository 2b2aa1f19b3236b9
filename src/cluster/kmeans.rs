//! K-means clustering.
//!
//! Partitions vectors into k clusters by minimizing **within-cluster sum of
//! squares** (inertia):
//!
//! ```text
//! WCSS = Σₖ Σᵢ∈Cₖ ||xᵢ - μₖ||²
//! ```
//!
//! # Lloyd's Algorithm
//!
//! 1. Initialize k centroids (k-means++ or random rows)
//! 2. **Assign**: each point → nearest centroid
//! 3. **Update**: each centroid → mean of assigned points
//! 4. Repeat until the squared centroid shift drops below `tol`
//!
//! Lloyd finds a local optimum only, so the whole procedure is restarted
//! `n_init` times and the run with the lowest inertia is kept.
//!
//! # Determinism
//!
//! With a seed, every random draw comes from one `StdRng`, so the same seed and
//! input order always yield the same labels and centers. The `parallel`
//! feature only parallelizes the per-row assignment; inertia is still summed
//! in row order, so restarts are compared on identical values.

use super::label::ClusterLabel;
use super::traits::{Capabilities, ClusterAlgorithm, FitState};
use super::util;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Centroid initialization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KmeansInit {
    /// D²-weighted seeding.
    #[default]
    KmeansPlusPlus,
    /// k distinct rows chosen uniformly.
    Random,
}

impl KmeansInit {
    /// Name as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            KmeansInit::KmeansPlusPlus => "k-means++",
            KmeansInit::Random => "random",
        }
    }
}

impl FromStr for KmeansInit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "k-means++" | "kmeans++" => Ok(KmeansInit::KmeansPlusPlus),
            "random" => Ok(KmeansInit::Random),
            other => Err(Error::invalid_parameter(
                "init",
                format!("unknown initialization '{other}'"),
            )),
        }
    }
}

/// Serializable k-means parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmeansParams {
    /// Number of clusters.
    #[serde(alias = "n_clusters")]
    pub k: usize,
    /// Initialization strategy name.
    pub init: String,
    /// Independent restarts.
    pub n_init: usize,
    /// Maximum Lloyd iterations per restart.
    pub max_iter: usize,
    /// Convergence tolerance on squared centroid shift.
    pub tol: f64,
    /// Random seed.
    #[serde(alias = "random_state")]
    pub seed: Option<u64>,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            k: 10,
            init: KmeansInit::KmeansPlusPlus.as_str().to_string(),
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
struct KmeansFit {
    centers: Array2<f32>,
    inertia: f32,
    n_iter: usize,
}

/// K-means clustering algorithm.
#[derive(Debug, Clone)]
pub struct Kmeans {
    /// Number of clusters.
    k: usize,
    /// Initialization.
    init: KmeansInit,
    /// Restarts.
    n_init: usize,
    /// Maximum iterations.
    max_iter: usize,
    /// Convergence tolerance.
    tol: f64,
    /// Random seed.
    seed: Option<u64>,
    state: FitState<KmeansFit>,
}

impl Kmeans {
    /// Create a new K-means clusterer.
    pub fn new(k: usize) -> Self {
        let defaults = KmeansParams::default();
        Self {
            k,
            init: KmeansInit::KmeansPlusPlus,
            n_init: defaults.n_init,
            max_iter: defaults.max_iter,
            tol: defaults.tol,
            seed: None,
            state: FitState::Unfit,
        }
    }

    /// Build from serialized parameters, validating names and ranges.
    pub fn from_params(params: &KmeansParams) -> Result<Self> {
        let model = Self::new(params.k)
            .with_init(params.init.parse()?)
            .with_n_init(params.n_init)
            .with_max_iter(params.max_iter)
            .with_tol(params.tol);
        let model = match params.seed {
            Some(seed) => model.with_seed(seed),
            None => model,
        };
        model.validate()?;
        Ok(model)
    }

    /// Set initialization strategy.
    pub fn with_init(mut self, init: KmeansInit) -> Self {
        self.init = init;
        self
    }

    /// Set number of restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of clusters.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Inertia of the kept run.
    pub fn inertia(&self) -> Result<f32> {
        Ok(self.state.fitted("kmeans")?.inertia)
    }

    /// Iterations used by the kept run.
    pub fn n_iter(&self) -> Result<usize> {
        Ok(self.state.fitted("kmeans")?.n_iter)
    }

    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::invalid_parameter("k", "must be at least 1"));
        }
        if self.n_init == 0 {
            return Err(Error::invalid_parameter("n_init", "must be at least 1"));
        }
        if self.max_iter == 0 {
            return Err(Error::invalid_parameter("max_iter", "must be at least 1"));
        }
        if self.tol.is_nan() || self.tol < 0.0 {
            return Err(Error::invalid_parameter("tol", "must be non-negative"));
        }
        Ok(())
    }

    /// One Lloyd run from a fresh initialization.
    fn lloyd(
        &self,
        data: &Array2<f32>,
        rng: &mut dyn RngCore,
        labels: &mut [usize],
    ) -> (Array2<f32>, f32, usize) {
        let n = data.nrows();
        let d = data.ncols();
        let mut centroids = init_centroids(self.init, self.k, data, rng);
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            assign(data, &centroids, labels);

            // Update step
            let mut new_centroids = Array2::zeros((self.k, d));
            let mut counts = vec![0usize; self.k];

            for i in 0..n {
                let k = labels[i];
                for j in 0..d {
                    new_centroids[[k, j]] += data[[i, j]];
                }
                counts[k] += 1;
            }

            for k in 0..self.k {
                if counts[k] > 0 {
                    for j in 0..d {
                        new_centroids[[k, j]] /= counts[k] as f32;
                    }
                } else {
                    // Empty cluster: reseed from a random row
                    let idx = rng.random_range(0..n);
                    new_centroids.row_mut(k).assign(&data.row(idx));
                }
            }

            let shift: f32 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();

            centroids = new_centroids;

            if shift <= self.tol as f32 {
                break;
            }
        }

        let inertia = assign(data, &centroids, labels);
        (centroids, inertia, n_iter)
    }
}

impl Default for Kmeans {
    fn default() -> Self {
        Self::new(KmeansParams::default().k)
    }
}

impl ClusterAlgorithm for Kmeans {
    fn name(&self) -> &'static str {
        "kmeans"
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
        if self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }

        let mut rng = make_rng(self.seed);
        let mut best: Option<(Vec<usize>, Array2<f32>, f32, usize)> = None;
        let mut labels = vec![0usize; n];

        for _ in 0..self.n_init {
            let (centers, inertia, n_iter) = self.lloyd(&data, &mut *rng, &mut labels);
            if best.as_ref().map_or(true, |b| inertia < b.2) {
                best = Some((labels.clone(), centers, inertia, n_iter));
            }
        }

        let Some((labels, centers, inertia, n_iter)) = best else {
            return Err(Error::invalid_parameter("n_init", "must be at least 1"));
        };
        tracing::debug!(k = self.k, n, inertia, n_iter, "kmeans fit");
        self.state = FitState::Fit(KmeansFit {
            centers,
            inertia,
            n_iter,
        });
        Ok(labels.into_iter().map(ClusterLabel::Cluster).collect())
    }

    fn centers(&self) -> Result<Vec<Vec<f32>>> {
        let fit = self.state.fitted("kmeans")?;
        Ok(fit.centers.rows().into_iter().map(|r| r.to_vec()).collect())
    }

    fn metadata(&self) -> Value {
        json!({
            "algorithm": self.name(),
            "k": self.k,
            "init": self.init.as_str(),
            "n_init": self.n_init,
            "max_iter": self.max_iter,
            "tol": self.tol,
            "seed": self.seed,
            "number_of_clusters": self.k,
        })
    }
}

/// Seeded `StdRng`, or the thread RNG when no seed is given.
pub(crate) fn make_rng(seed: Option<u64>) -> Box<dyn RngCore> {
    match seed {
        Some(s) => Box::new(StdRng::seed_from_u64(s)),
        None => Box::new(StdRng::from_rng(&mut rand::rng())),
    }
}

/// Validate and copy vectors into a dense row-major matrix.
pub(crate) fn to_array(vectors: &[Vec<f32>]) -> Result<Array2<f32>> {
    let d = util::check_vectors(vectors)?;
    let n = vectors.len();
    let mut flat: Vec<f32> = Vec::with_capacity(n * d);
    for point in vectors {
        flat.extend(point);
    }
    Array2::from_shape_vec((n, d), flat)
        .map_err(|e| Error::invalid_parameter("vectors", e.to_string()))
}

/// Initialize centroids.
pub(crate) fn init_centroids(
    init: KmeansInit,
    k: usize,
    data: &Array2<f32>,
    rng: &mut dyn RngCore,
) -> Array2<f32> {
    let n = data.nrows();
    let d = data.ncols();
    let mut centroids = Array2::zeros((k, d));

    if init == KmeansInit::Random {
        let picks = rand::seq::index::sample(rng, n, k.min(n));
        for (c, idx) in picks.iter().enumerate() {
            centroids.row_mut(c).assign(&data.row(idx));
        }
        return centroids;
    }

    // First centroid: random point
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    // Remaining centroids: k-means++ selection
    let mut distances: Vec<f32> = (0..n)
        .map(|j| squared_distance(&data.row(j), &centroids.row(0)))
        .collect();

    for i in 1..k {
        // Sample proportional to squared distance
        let total: f32 = distances.iter().sum();
        let selected = if total == 0.0 {
            rng.random_range(0..n)
        } else {
            let threshold = rng.random::<f32>() * total;
            let mut cumsum = 0.0;
            let mut selected = n - 1;
            for (j, &dist) in distances.iter().enumerate() {
                cumsum += dist;
                if cumsum >= threshold && dist > 0.0 {
                    selected = j;
                    break;
                }
            }
            selected
        };

        centroids.row_mut(i).assign(&data.row(selected));
        for (j, slot) in distances.iter_mut().enumerate() {
            let dist = squared_distance(&data.row(j), &centroids.row(i));
            if dist < *slot {
                *slot = dist;
            }
        }
    }

    centroids
}

/// Assign every row to its nearest centroid; returns total inertia.
pub(crate) fn assign(data: &Array2<f32>, centroids: &Array2<f32>, labels: &mut [usize]) -> f32 {
    #[cfg(feature = "parallel")]
    {
        let dists: Vec<f32> = labels
            .par_iter_mut()
            .enumerate()
            .map(|(i, label)| {
                let (best, dist) = nearest(&data.row(i), centroids);
                *label = best;
                dist
            })
            .collect();
        // Summed in row order so inertia matches the sequential build.
        dists.iter().sum()
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut inertia = 0.0;
        for (i, label) in labels.iter_mut().enumerate() {
            let (best, dist) = nearest(&data.row(i), centroids);
            *label = best;
            inertia += dist;
        }
        inertia
    }
}

/// Index of, and squared distance to, the closest centroid.
#[inline]
pub(crate) fn nearest(point: &ArrayView1<'_, f32>, centroids: &Array2<f32>) -> (usize, f32) {
    let mut best_cluster = 0;
    let mut best_dist = f32::MAX;
    for (k, centroid) in centroids.rows().into_iter().enumerate() {
        let dist = squared_distance(point, &centroid);
        if dist < best_dist {
            best_dist = dist;
            best_cluster = k;
        }
    }
    (best_cluster, best_dist)
}

/// Compute squared Euclidean distance.
#[inline]
fn squared_distance(a: &ArrayView1<'_, f32>, b: &ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
