//! K-means over standardized feature vectors.
//!
//! Plain Lloyd iterations from randomly permuted seeds:
//!
//! 1. assign every vector to its nearest centroid (squared Euclidean)
//! 2. move each centroid to the mean of its members
//! 3. re-seed any cluster left without members
//!
//! until an assignment pass changes nothing or the iteration cap is hit.
//! The engine does no feature scaling; callers standardize first
//! (see [`crate::similarity::standardize`]).

pub mod describe;
pub mod elbow;

use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Iteration cap for interactive clustering runs.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

#[derive(Error, Debug, PartialEq)]
pub enum ClusterError {
    #[error("no vectors to cluster")]
    EmptyInput,
    #[error("vector {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Result of one k-means run.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster index per input vector.
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Clusters actually produced; may be below the request.
    pub k: usize,
    pub iterations: usize,
    /// False when the iteration cap stopped the run.
    pub converged: bool,
}

impl KMeansFit {
    /// Members per cluster.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.k];
        for &c in &self.assignments {
            counts[c] += 1;
        }
        counts
    }

    /// Sum of squared distances from each vector to its centroid.
    pub fn inertia(&self, vectors: &[Vec<f64>]) -> f64 {
        vectors
            .iter()
            .zip(&self.assignments)
            .map(|(v, &c)| squared_distance(v, &self.centroids[c]))
            .sum()
    }
}

/// Cluster count actually used for `n` vectors: at least 1, never more than `n`.
pub fn effective_k(requested: usize, n: usize) -> usize {
    requested.max(1).min(n)
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Run k-means. `rng` drives seeding and re-seeding, so a seeded RNG gives
/// reproducible partitions.
pub fn kmeans<R: Rng + ?Sized>(
    vectors: &[Vec<f64>],
    dims: usize,
    k: usize,
    max_iter: usize,
    rng: &mut R,
) -> Result<KMeansFit> {
    if vectors.is_empty() {
        return Err(ClusterError::EmptyInput);
    }
    for (index, v) in vectors.iter().enumerate() {
        if v.len() != dims {
            return Err(ClusterError::DimensionMismatch {
                index,
                expected: dims,
                found: v.len(),
            });
        }
    }

    let n = vectors.len();
    let k = effective_k(k, n);
    let max_iter = max_iter.max(1);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut centroids: Vec<Vec<f64>> = (0..k).map(|i| vectors[order[i % n]].clone()).collect();

    let mut assignments = vec![0usize; n];
    let mut counts = vec![0usize; k];
    let mut changed = true;
    let mut iterations = 0;

    while changed && iterations < max_iter {
        changed = false;
        let first_pass = iterations == 0;
        iterations += 1;

        // Assignment. First pass: ties go to the lowest index. Later passes:
        // a point only moves when another centroid is strictly closer.
        for (i, v) in vectors.iter().enumerate() {
            let (mut best, mut best_dist) = if first_pass {
                (0, f64::INFINITY)
            } else {
                (assignments[i], squared_distance(v, &centroids[assignments[i]]))
            };
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = squared_distance(v, centroid);
                if dist < best_dist {
                    best = c;
                    best_dist = dist;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        // Update
        let mut sums = vec![vec![0.0_f64; dims]; k];
        counts = vec![0usize; k];
        for (v, &c) in vectors.iter().zip(&assignments) {
            counts[c] += 1;
            for (s, x) in sums[c].iter_mut().zip(v) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                let n_c = counts[c] as f64;
                centroids[c] = sums[c].iter().map(|s| s / n_c).collect();
            }
        }

        // Empty clusters: take a random point from a cluster that can spare one
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let donors: Vec<usize> = (0..n).filter(|&i| counts[assignments[i]] > 1).collect();
            match donors.choose(rng) {
                Some(&i) => {
                    counts[assignments[i]] -= 1;
                    assignments[i] = c;
                    counts[c] = 1;
                    centroids[c] = vectors[i].clone();
                }
                None => {
                    let i = rng.gen_range(0..n);
                    centroids[c] = vectors[i].clone();
                }
            }
            changed = true;
        }
    }

    let converged = !changed;
    log::debug!(
        "k-means: k={} n={} iterations={} converged={} sizes={:?}",
        k,
        n,
        iterations,
        converged,
        counts
    );

    Ok(KMeansFit {
        assignments,
        centroids,
        k,
        iterations,
        converged,
    })
}
