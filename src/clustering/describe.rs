//! Qualitative per-cluster labels ("High energy, Low acoustic.").

use crate::store::models::Field;

pub const NOT_GENERATED: &str = "Cluster was not generated for the current sample.";
pub const NO_MEMBERS: &str = "No tracks assigned to this cluster.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// Thirds of one dimension's observed range.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub min: f64,
    pub max: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Thresholds {
    pub fn from_values(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;
        Self {
            min,
            max,
            lower: min + range / 3.0,
            upper: min + 2.0 * range / 3.0,
        }
    }

    fn is_degenerate(&self) -> bool {
        !self.min.is_finite() || !self.max.is_finite() || self.max <= self.min
    }

    pub fn level(&self, value: f64) -> Level {
        if self.is_degenerate() || !value.is_finite() {
            Level::Medium
        } else if value <= self.lower {
            Level::Low
        } else if value >= self.upper {
            Level::High
        } else {
            Level::Medium
        }
    }
}

/// One sentence per palette slot.
///
/// `raw` holds the unscaled vectors of every clustered row (columns follow
/// `fields`), `assignments` their cluster, `k` the achieved cluster count.
/// Slots at or beyond `k` get a placeholder, as do empty clusters.
pub fn describe_clusters(
    fields: &[Field],
    raw: &[Vec<f64>],
    assignments: &[usize],
    k: usize,
    slots: usize,
) -> Vec<String> {
    let thresholds: Vec<Thresholds> = (0..fields.len())
        .map(|d| Thresholds::from_values(raw.iter().map(|v| v[d])))
        .collect();

    let mut sums = vec![vec![0.0_f64; fields.len()]; k];
    let mut counts = vec![0usize; k];
    for (v, &c) in raw.iter().zip(assignments) {
        if c >= k {
            continue;
        }
        counts[c] += 1;
        for (s, x) in sums[c].iter_mut().zip(v) {
            *s += x;
        }
    }

    (0..slots)
        .map(|c| {
            if c >= k {
                return NOT_GENERATED.to_string();
            }
            if counts[c] == 0 {
                return NO_MEMBERS.to_string();
            }
            let phrases: Vec<String> = fields
                .iter()
                .enumerate()
                .map(|(d, field)| {
                    let mean = sums[c][d] / counts[c] as f64;
                    format!("{} {}", thresholds[d].level(mean).as_str(), field.label())
                })
                .collect();
            format!("{}.", phrases.join(", "))
        })
        .collect()
}
