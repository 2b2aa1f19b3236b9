//! Merge history of agglomerative clustering.
//!
//! Items are `0..n`; merge `i` creates node `n + i` (SciPy convention).

use crate::cluster::util::UnionFind;
use serde::Serialize;

/// A dendrogram: the ordered merges that join `n_items` leaves into one tree.
#[derive(Debug, Clone, Serialize)]
pub struct Dendrogram {
    merges: Vec<Merge>,
    n_items: usize,
}

/// A single merge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Merge {
    /// First merged node.
    pub cluster_a: usize,
    /// Second merged node.
    pub cluster_b: usize,
    /// Linkage distance of the merge.
    pub distance: f64,
    /// Leaves under the new node.
    pub size: usize,
}

impl Dendrogram {
    /// Empty dendrogram over `n_items` leaves.
    pub fn new(n_items: usize) -> Self {
        Self {
            merges: Vec::with_capacity(n_items.saturating_sub(1)),
            n_items,
        }
    }

    /// Append a merge. Merges must be added in non-decreasing distance order.
    pub fn add_merge(&mut self, cluster_a: usize, cluster_b: usize, distance: f64, size: usize) {
        self.merges.push(Merge {
            cluster_a,
            cluster_b,
            distance,
            size,
        });
    }

    /// Flat labels after applying every merge with `distance < threshold`.
    pub fn cut_at_distance(&self, threshold: f64) -> Vec<usize> {
        let applied = self
            .merges
            .iter()
            .take_while(|m| m.distance < threshold)
            .count();
        self.apply(applied)
    }

    /// Flat labels for exactly `k` clusters (clamped to `1..=n_items`).
    pub fn cut_to_k(&self, k: usize) -> Vec<usize> {
        let k = k.clamp(1, self.n_items.max(1));
        self.apply(self.n_items.saturating_sub(k))
    }

    /// Labels after the first `count` merges, numbered by first appearance.
    fn apply(&self, count: usize) -> Vec<usize> {
        let n = self.n_items;
        let mut uf = UnionFind::new(n);
        // Any leaf under each internal node.
        let mut representative: Vec<usize> = Vec::with_capacity(self.merges.len());
        let leaf = |node: usize, reps: &[usize]| if node < n { node } else { reps[node - n] };

        for m in self.merges.iter().take(count) {
            let a = leaf(m.cluster_a, &representative);
            let b = leaf(m.cluster_b, &representative);
            uf.union(a, b);
            representative.push(a);
        }

        let mut relabel = vec![usize::MAX; n];
        let mut next = 0;
        (0..n)
            .map(|i| {
                let root = uf.find(i);
                if relabel[root] == usize::MAX {
                    relabel[root] = next;
                    next += 1;
                }
                relabel[root]
            })
            .collect()
    }

    /// Number of leaves.
    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Number of merges recorded.
    pub fn n_merges(&self) -> usize {
        self.merges.len()
    }

    /// Iterate over merges in order.
    pub fn merges(&self) -> impl Iterator<Item = &Merge> {
        self.merges.iter()
    }

    /// Merge distances, in merge order.
    pub fn distances(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.distance).collect()
    }

    /// SciPy-style linkage matrix rows `[a, b, distance, size]`.
    pub fn linkage_matrix(&self) -> Vec<[f64; 4]> {
        self.merges
            .iter()
            .map(|m| [m.cluster_a as f64, m.cluster_b as f64, m.distance, m.size as f64])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0 and 1 at 0.5, 2 and 3 at 0.7, then both pairs at 1.0.
    fn four() -> Dendrogram {
        let mut d = Dendrogram::new(4);
        d.add_merge(0, 1, 0.5, 2);
        d.add_merge(2, 3, 0.7, 2);
        d.add_merge(4, 5, 1.0, 4);
        d
    }

    #[test]
    fn cut_by_count() {
        let d = four();
        assert_eq!(d.cut_to_k(4), vec![0, 1, 2, 3]);
        assert_eq!(d.cut_to_k(3), vec![0, 0, 1, 2]);
        assert_eq!(d.cut_to_k(2), vec![0, 0, 1, 1]);
        assert_eq!(d.cut_to_k(1), vec![0, 0, 0, 0]);
        assert_eq!(d.cut_to_k(0), vec![0, 0, 0, 0]);
    }

    #[test]
    fn cut_by_distance_is_strict() {
        let d = four();
        assert_eq!(d.cut_at_distance(0.0), vec![0, 1, 2, 3]);
        assert_eq!(d.cut_at_distance(0.5), vec![0, 1, 2, 3]);
        assert_eq!(d.cut_at_distance(0.8), vec![0, 0, 1, 1]);
        assert_eq!(d.cut_at_distance(f64::INFINITY), vec![0, 0, 0, 0]);
    }

    #[test]
    fn linkage_rows() {
        let rows = four().linkage_matrix();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], [4.0, 5.0, 1.0, 4.0]);
    }
}
