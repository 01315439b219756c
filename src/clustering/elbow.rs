//! Cluster-count suggestion via the elbow of the inertia curve.

use rand::Rng;
use serde::Serialize;

use super::{ClusterError, kmeans};

/// Most rows fed into the sweep; larger sets are strided down to this.
pub const DEFAULT_SAMPLE_CAP: usize = 400;
/// Iteration cap per sweep run, kept below the interactive cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 30;
/// With only two candidates, k=2 needs at least this relative inertia drop.
pub const TWO_CANDIDATE_MIN_DROP: f64 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct ElbowParams {
    /// Largest k to try (the palette size).
    pub max_k: usize,
    pub sample_cap: usize,
    pub max_iterations: usize,
}

/// Which rule produced the suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElbowMethod {
    SingleCandidate,
    TwoCandidates,
    MaxDistance,
    RelativeDrop,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub k: usize,
    pub sample_size: usize,
    /// Inertia for k = 1, 2, ...
    pub inertias: Vec<f64>,
    pub method: ElbowMethod,
}

/// Evenly strided positions covering `0..n`, at most `cap` of them.
pub fn stride_sample(n: usize, cap: usize) -> Vec<usize> {
    if n <= cap {
        return (0..n).collect();
    }
    (0..cap).map(|i| i * n / cap).collect()
}

/// Sweep k over the (sampled) standardized vectors and pick the elbow.
/// Returns `Ok(None)` when there is nothing to cluster.
pub fn suggest_cluster_count<R: Rng + ?Sized>(
    vectors: &[Vec<f64>],
    dims: usize,
    params: &ElbowParams,
    rng: &mut R,
) -> Result<Option<Suggestion>, ClusterError> {
    if vectors.is_empty() {
        return Ok(None);
    }

    let sample: Vec<Vec<f64>> = stride_sample(vectors.len(), params.sample_cap.max(1))
        .into_iter()
        .map(|i| vectors[i].clone())
        .collect();
    let sample_size = sample.len();

    if sample_size == 1 {
        return Ok(Some(Suggestion {
            k: 1,
            sample_size,
            inertias: vec![0.0],
            method: ElbowMethod::SingleCandidate,
        }));
    }

    let max_k = params.max_k.max(1).min(sample_size);
    let mut inertias = Vec::with_capacity(max_k);
    for k in 1..=max_k {
        let fit = kmeans(&sample, dims, k, params.max_iterations, rng)?;
        inertias.push(fit.inertia(&sample));
    }

    let (k, method) = pick_elbow(&inertias);
    let k = k.clamp(1, max_k);
    log::debug!("Elbow sweep over {} rows: inertias={:?} -> k={} ({:?})", sample_size, inertias, k, method);

    Ok(Some(Suggestion {
        k,
        sample_size,
        inertias,
        method,
    }))
}

/// Pick k from an inertia curve where `inertias[i]` belongs to k = i + 1.
pub fn pick_elbow(inertias: &[f64]) -> (usize, ElbowMethod) {
    match inertias.len() {
        0 | 1 => (1, ElbowMethod::SingleCandidate),
        2 => {
            let drop = relative_drop(inertias[0], inertias[1]).unwrap_or(0.0);
            if drop > TWO_CANDIDATE_MIN_DROP {
                (2, ElbowMethod::TwoCandidates)
            } else {
                (1, ElbowMethod::TwoCandidates)
            }
        }
        n => {
            let (x1, y1) = (1.0, inertias[0]);
            let (x2, y2) = (n as f64, inertias[n - 1]);
            let norm = ((y2 - y1).powi(2) + (x2 - x1).powi(2)).sqrt();

            let mut best_k = 1;
            let mut best_dist = 0.0;
            for (i, &y) in inertias.iter().enumerate() {
                let x = (i + 1) as f64;
                let dist = ((y2 - y1) * x - (x2 - x1) * y + x2 * y1 - y2 * x1).abs() / norm;
                if dist > best_dist {
                    best_dist = dist;
                    best_k = i + 1;
                }
            }

            if best_dist > 0.0 && best_dist.is_finite() {
                (best_k, ElbowMethod::MaxDistance)
            } else {
                (largest_relative_drop(inertias), ElbowMethod::RelativeDrop)
            }
        }
    }
}

fn relative_drop(prev: f64, next: f64) -> Option<f64> {
    if prev > 0.0 && prev.is_finite() && next.is_finite() {
        Some((prev - next) / prev)
    } else {
        None
    }
}

/// k whose inertia fell furthest (relatively) from k - 1; 1 if nothing fell.
fn largest_relative_drop(inertias: &[f64]) -> usize {
    let mut best_k = 1;
    let mut best_drop = 0.0;
    for i in 1..inertias.len() {
        if let Some(drop) = relative_drop(inertias[i - 1], inertias[i]) {
            if drop > best_drop {
                best_drop = drop;
                best_k = i + 1;
            }
        }
    }
    best_k
}
