//! Distance metrics and helpers shared by the algorithms.

use super::label::ClusterLabel;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Distance used by density and hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// L2 distance.
    #[default]
    Euclidean,
    /// L1 distance.
    #[serde(alias = "l1", alias = "cityblock")]
    Manhattan,
    /// `1 - cos(a, b)`.
    Cosine,
}

impl Metric {
    /// Distance between two points.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => squared_euclidean(a, b).sqrt(),
            Metric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (na * nb)).max(0.0)
            }
        }
    }

    /// Name as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Cosine => "cosine",
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "l1" | "cityblock" => Ok(Metric::Manhattan),
            "cosine" => Ok(Metric::Cosine),
            other => Err(Error::invalid_parameter(
                "metric",
                format!("unsupported metric '{other}'"),
            )),
        }
    }
}

#[inline]
pub(crate) fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Check the input is non-empty and uniformly dimensioned; return the dimension.
pub(crate) fn check_vectors(data: &[Vec<f32>]) -> Result<usize> {
    let first = data.first().ok_or(Error::EmptyInput)?;
    let d = first.len();
    if d == 0 {
        return Err(Error::invalid_parameter("dimension", "must be at least 1"));
    }
    if let Some(p) = data.iter().find(|p| p.len() != d) {
        return Err(Error::DimensionMismatch {
            expected: d,
            found: p.len(),
        });
    }
    Ok(d)
}

/// Mean vector per label. Noise is skipped; output is sorted by label.
pub fn mean_by_label(
    vectors: &[Vec<f32>],
    labels: &[ClusterLabel],
) -> Result<Vec<(ClusterLabel, Vec<f32>)>> {
    if vectors.len() != labels.len() {
        return Err(Error::LengthMismatch {
            left_name: "vectors",
            left: vectors.len(),
            right_name: "labels",
            right: labels.len(),
        });
    }

    let mut sums: BTreeMap<ClusterLabel, (Vec<f64>, usize)> = BTreeMap::new();
    for (v, &label) in vectors.iter().zip(labels) {
        if label.is_noise() {
            continue;
        }
        let (sum, count) = sums
            .entry(label)
            .or_insert_with(|| (vec![0.0; v.len()], 0));
        if sum.len() != v.len() {
            return Err(Error::DimensionMismatch {
                expected: sum.len(),
                found: v.len(),
            });
        }
        for (s, x) in sum.iter_mut().zip(v) {
            *s += *x as f64;
        }
        *count += 1;
    }

    Ok(sums
        .into_iter()
        .map(|(label, (sum, count))| {
            let mean = sum.iter().map(|s| (s / count as f64) as f32).collect();
            (label, mean)
        })
        .collect())
}

#[derive(Clone, Debug)]
pub(crate) struct UnionFind {
    pub(crate) parent: Vec<usize>,
    pub(crate) size: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub(crate) fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    pub(crate) fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        self.union_roots(ra, rb)
    }

    pub(crate) fn union_roots(&mut self, ra: usize, rb: usize) -> usize {
        if ra == rb {
            return ra;
        }

        // Union by size.
        let (mut big, mut small) = (ra, rb);
        if self.size[big] < self.size[small] {
            std::mem::swap(&mut big, &mut small);
        }

        self.parent[small] = big;
        self.size[big] += self.size[small];
        big
    }
}

/// Minimum spanning tree of a dense complete graph (Prim, O(n²)).
///
/// Returns edges `(u, v, weight)`.
pub(crate) fn prim_mst(
    n: usize,
    dist_fn: impl Fn(usize, usize) -> f32,
) -> Vec<(usize, usize, f32)> {
    if n <= 1 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f32::INFINITY; n];
    let mut parent = vec![usize::MAX; n];

    best[0] = 0.0;

    for _ in 0..n {
        let mut u = usize::MAX;
        let mut best_val = f32::INFINITY;
        for i in 0..n {
            if !in_tree[i] && best[i] < best_val {
                best_val = best[i];
                u = i;
            }
        }

        if u == usize::MAX {
            break;
        }
        in_tree[u] = true;

        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let d = dist_fn(u, v);
            if d < best[v] {
                best[v] = d;
                parent[v] = u;
            }
        }
    }

    (1..n)
        .filter(|&v| parent[v] != usize::MAX)
        .map(|v| (parent[v], v, best[v]))
        .collect()
}
