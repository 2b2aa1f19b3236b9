//! HDBSCAN: Hierarchical Density-Based Spatial Clustering of Applications with Noise.
//!
//! Campello, Moulavi, Sander (2013). Instead of DBSCAN's global epsilon, the
//! algorithm builds a hierarchy of density-connected components and keeps
//! the most *stable* ones.
//!
//! # Outline
//!
//! 1. **Core distance** of a point: distance to its `min_samples`-th neighbour.
//! 2. **Mutual reachability**: `mrd(i, j) = max(core[i], core[j], d(i, j) / alpha)`.
//! 3. **MST** over mutual reachability (Prim, O(n²)).
//! 4. **Condensed tree**: replay MST edges in ascending order; components
//!    smaller than `min_cluster_size` fall out of their parent as points
//!    instead of splitting it.
//! 5. **Stability selection**: pick the non-overlapping clusters maximizing
//!    `Σ size × (λ - λ_birth)`.
//! 6. Points outside every selected cluster are **noise**
//!    ([`ClusterLabel::Noise`]); they are never relabeled.
//!
//! Dense O(n²) memory: suitable up to tens of thousands of vectors.

use super::label::ClusterLabel;
use super::traits::{Capabilities, ClusterAlgorithm, FitState};
use super::util::{self, Metric, UnionFind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Serializable HDBSCAN parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdbscanParams {
    /// Smallest group that counts as a cluster.
    pub min_cluster_size: usize,
    /// Neighbour rank for core distances; defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,
    /// Distance metric.
    pub metric: Metric,
    /// Distance scaling in mutual reachability.
    pub alpha: f32,
}

impl Default for HdbscanParams {
    fn default() -> Self {
        Self {
            min_cluster_size: 10,
            min_samples: None,
            metric: Metric::Euclidean,
            alpha: 1.0,
        }
    }
}

/// HDBSCAN clustering algorithm.
#[derive(Debug, Clone, Default)]
pub struct Hdbscan {
    params: HdbscanParams,
    state: FitState<usize>,
}

impl Hdbscan {
    /// Create with default parameters (`min_cluster_size = 10`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from serialized parameters.
    pub fn from_params(params: &HdbscanParams) -> Result<Self> {
        let model = Self {
            params: params.clone(),
            state: FitState::Unfit,
        };
        model.validate()?;
        Ok(model)
    }

    /// Set `min_cluster_size`.
    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.params.min_cluster_size = min_cluster_size;
        self
    }

    /// Set `min_samples`.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.params.min_samples = Some(min_samples);
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.params.metric = metric;
        self
    }

    /// Set `alpha`.
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.params.alpha = alpha;
        self
    }

    /// Number of non-noise clusters found by the last fit.
    pub fn n_clusters_found(&self) -> Result<usize> {
        self.state.fitted("hdbscan").copied()
    }

    fn min_samples(&self) -> usize {
        self.params.min_samples.unwrap_or(self.params.min_cluster_size)
    }

    fn validate(&self) -> Result<()> {
        if self.params.min_cluster_size < 2 {
            return Err(Error::invalid_parameter("min_cluster_size", "must be at least 2"));
        }
        if self.min_samples() == 0 {
            return Err(Error::invalid_parameter("min_samples", "must be at least 1"));
        }
        if self.params.alpha.is_nan() || self.params.alpha <= 0.0 {
            return Err(Error::invalid_parameter("alpha", "must be positive"));
        }
        Ok(())
    }
}

impl ClusterAlgorithm for Hdbscan {
    fn name(&self) -> &'static str {
        "hdbscan"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn fit_transform(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<ClusterLabel>> {
        self.validate()?;
        util::check_vectors(vectors)?;
        let n = vectors.len();

        let metric = self.params.metric;
        let alpha = self.params.alpha;
        let mut dists = vec![0.0f32; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = metric.distance(&vectors[i], &vectors[j]) / alpha;
                dists[i * n + j] = d;
                dists[j * n + i] = d;
            }
        }
        let core = core_distances(&dists, n, self.min_samples());

        let mut mst = util::prim_mst(n, |i, j| dists[i * n + j].max(core[i]).max(core[j]));
        mst.sort_by(|a, b| a.2.total_cmp(&b.2));

        let labels = CondensedTree::build(&mst, n, self.params.min_cluster_size).labels();
        let found = labels.iter().flatten().max().map_or(0, |k| k + 1);
        tracing::debug!(
            n,
            clusters = found,
            noise = labels.iter().filter(|l| l.is_none()).count(),
            "hdbscan fit"
        );
        self.state = FitState::Fit(found);
        Ok(labels.into_iter().map(ClusterLabel::from).collect())
    }

    fn metadata(&self) -> Value {
        json!({
            "algorithm": self.name(),
            "min_cluster_size": self.params.min_cluster_size,
            "min_samples": self.min_samples(),
            "metric": self.params.metric.as_str(),
            "alpha": self.params.alpha,
        })
    }
}

fn core_distances(dists: &[f32], n: usize, min_samples: usize) -> Vec<f32> {
    if n < 2 {
        return vec![0.0; n];
    }
    let k = min_samples.min(n - 1).max(1);
    (0..n)
        .map(|i| {
            let mut row: Vec<f32> = (0..n).filter(|&j| j != i).map(|j| dists[i * n + j]).collect();
            row.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
            row[k - 1]
        })
        .collect()
}

/// One row of the condensed tree.
///
/// `child` is a point index (`child_size == 1`) or a cluster id `>= n`.
struct Edge {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

struct CondensedTree {
    n: usize,
    edges: Vec<Edge>,
    n_clusters: usize,
}

impl CondensedTree {
    fn build(mst: &[(usize, usize, f32)], n: usize, min_cluster_size: usize) -> Self {
        let mut tree = Self {
            n,
            edges: Vec::new(),
            n_clusters: 0,
        };
        if n < 2 {
            return tree;
        }

        let mut uf = UnionFind::new(n);
        // UF root -> cluster id currently owning that component.
        let mut owner: Vec<Option<usize>> = vec![None; n];

        for &(u, v, dist) in mst {
            let ru = uf.find(u);
            let rv = uf.find(v);
            if ru == rv {
                continue;
            }

            let lambda = if dist > 0.0 { 1.0 / dist as f64 } else { f64::INFINITY };
            let (su, sv) = (uf.size[ru], uf.size[rv]);
            let big_u = su >= min_cluster_size;
            let big_v = sv >= min_cluster_size;

            let merged_owner = if big_u && big_v {
                // True split seen top-down: both sides become child clusters.
                let parent = tree.new_cluster();
                for (root, size) in [(ru, su), (rv, sv)] {
                    let child = match owner[root] {
                        Some(c) => c,
                        None => {
                            let c = tree.new_cluster();
                            tree.fall_out(&uf, root, c, lambda);
                            c
                        }
                    };
                    tree.edges.push(Edge {
                        parent,
                        child,
                        lambda,
                        child_size: size,
                    });
                }
                Some(parent)
            } else if big_u || big_v {
                let (big, small) = if big_u { (ru, rv) } else { (rv, ru) };
                let cluster = match owner[big] {
                    Some(c) => c,
                    None => {
                        let c = tree.new_cluster();
                        tree.fall_out(&uf, big, c, lambda);
                        c
                    }
                };
                tree.fall_out(&uf, small, cluster, lambda);
                Some(cluster)
            } else if su + sv >= min_cluster_size {
                // Seen top-down, the cluster shrinks below the minimum here
                // and all of its points fall out at once.
                let cluster = tree.new_cluster();
                tree.fall_out(&uf, ru, cluster, lambda);
                tree.fall_out(&uf, rv, cluster, lambda);
                Some(cluster)
            } else {
                None
            };

            let root = uf.union_roots(ru, rv);
            owner[root] = merged_owner;
        }
        tree
    }

    fn new_cluster(&mut self) -> usize {
        let id = self.n + self.n_clusters;
        self.n_clusters += 1;
        id
    }

    /// Record every point of the component rooted at `root` as leaving `cluster`.
    fn fall_out(&mut self, uf: &UnionFind, root: usize, cluster: usize, lambda: f64) {
        for p in 0..self.n {
            let mut x = p;
            while uf.parent[x] != x {
                x = uf.parent[x];
            }
            if x == root {
                self.edges.push(Edge {
                    parent: cluster,
                    child: p,
                    lambda,
                    child_size: 1,
                });
            }
        }
    }

    fn is_cluster_edge(&self, e: &Edge) -> bool {
        e.child_size > 1 && e.child >= self.n
    }

    /// Select stable clusters and label points; `None` is noise.
    fn labels(&self) -> Vec<Option<usize>> {
        let n = self.n;
        let m = self.n_clusters;
        if m == 0 {
            return vec![None; n];
        }

        let mut birth = vec![0.0f64; m];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); m];
        for e in self.edges.iter().filter(|e| self.is_cluster_edge(e)) {
            birth[e.child - n] = e.lambda;
            children[e.parent - n].push(e.child - n);
        }

        let mut stability = vec![0.0f64; m];
        for e in &self.edges {
            let c = e.parent - n;
            let contribution = e.child_size as f64 * (e.lambda - birth[c]);
            if contribution.is_finite() {
                stability[c] += contribution;
            }
        }

        let mut is_child = vec![false; m];
        for kids in &children {
            for &k in kids {
                is_child[k] = true;
            }
        }
        // Ids do not order parents after children; walk the tree explicitly.
        let mut order = Vec::with_capacity(m);
        let mut stack: Vec<usize> = (0..m).filter(|&c| !is_child[c]).collect();
        while let Some(c) = stack.pop() {
            order.push(c);
            stack.extend(&children[c]);
        }

        let mut selected = vec![false; m];
        let mut subtree = stability.clone();
        for &c in order.iter().rev() {
            if children[c].is_empty() {
                selected[c] = true;
                continue;
            }
            let below: f64 = children[c].iter().map(|&k| subtree[k]).sum();
            if stability[c] > below {
                selected[c] = true;
                let mut stack = children[c].clone();
                while let Some(k) = stack.pop() {
                    selected[k] = false;
                    stack.extend(&children[k]);
                }
            } else {
                subtree[c] = below;
            }
        }

        let mut labels = vec![None; n];
        let mut next = 0usize;
        for c in 0..m {
            if selected[c] {
                self.assign(c, next, &selected, &mut labels);
                next += 1;
            }
        }
        labels
    }

    /// Label the points of cluster `c` and of its unselected descendants.
    fn assign(&self, c: usize, label: usize, selected: &[bool], labels: &mut [Option<usize>]) {
        let mut stack = vec![c + self.n];
        while let Some(cluster) = stack.pop() {
            for e in self.edges.iter().filter(|e| e.parent == cluster) {
                if e.child_size == 1 && e.child < self.n {
                    labels[e.child] = Some(label);
                } else if self.is_cluster_edge(e) && !selected[e.child - self.n] {
                    stack.push(e.child);
                }
            }
        }
    }
}
