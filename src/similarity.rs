use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::store::RowStore;
use crate::store::models::{Field, FilterRange, TrackRow};
use crate::view;

/// Largest neighbour count the UI lets you ask for.
pub const MAX_KNN_K: usize = 50;

/// Numeric fields enabled for similarity and clustering. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Field>", into = "Vec<Field>")]
pub struct Dimensions {
    enabled: [bool; 6],
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            enabled: [true, true, true, true, false, false],
        }
    }
}

impl TryFrom<Vec<Field>> for Dimensions {
    type Error = String;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Self::from_fields(&fields).ok_or_else(|| "at least one dimension must be enabled".to_string())
    }
}

impl From<Dimensions> for Vec<Field> {
    fn from(dims: Dimensions) -> Self {
        dims.active()
    }
}

impl Dimensions {
    /// `None` when `fields` is empty.
    pub fn from_fields(fields: &[Field]) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let mut enabled = [false; 6];
        for field in fields {
            enabled[field.index()] = true;
        }
        Some(Self { enabled })
    }

    pub fn is_enabled(&self, field: Field) -> bool {
        self.enabled[field.index()]
    }

    /// Active fields in canonical order.
    pub fn active(&self) -> Vec<Field> {
        Field::ALL
            .iter()
            .copied()
            .filter(|f| self.is_enabled(*f))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.enabled.iter().filter(|e| **e).count()
    }

    /// Flip a field. Refuses (returns false) to disable the last enabled field.
    pub fn toggle(&mut self, field: Field) -> bool {
        let idx = field.index();
        if self.enabled[idx] && self.count() == 1 {
            return false;
        }
        self.enabled[idx] = !self.enabled[idx];
        true
    }
}

/// Weighted Euclidean distance over the active fields, each min-max scaled by
/// its *absolute* range. Fields missing on either side are skipped; if nothing
/// contributes the rows are incomparable and the distance is infinite.
pub fn distance(a: &TrackRow, b: &TrackRow, dims: &Dimensions, filters: &[FilterRange; 6]) -> f64 {
    let mut sum_squares = 0.0;
    let mut contributing = 0;

    for field in Field::ALL {
        if !dims.is_enabled(field) {
            continue;
        }
        let (Some(va), Some(vb)) = (a.value(field), b.value(field)) else {
            continue;
        };
        let range = &filters[field.index()];
        let span = range.span();
        let na = (va - range.absolute_min) / span;
        let nb = (vb - range.absolute_min) / span;
        sum_squares += (na - nb) * (na - nb);
        contributing += 1;
    }

    if contributing == 0 {
        f64::INFINITY
    } else {
        sum_squares.sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Up to `k` nearest rows to `target`, ascending by distance, drawn from the
/// filters-only view. A target that is itself filtered out yields nothing.
pub fn nearest_neighbors(
    store: &RowStore,
    target: usize,
    exclude: &HashSet<usize>,
    k: usize,
    dims: &Dimensions,
) -> Vec<Neighbor> {
    let eligible = view::filters_only(store);
    if !eligible.contains(&target) {
        return Vec::new();
    }
    let Some(target_row) = store.get(target) else {
        return Vec::new();
    };

    let mut neighbors: Vec<Neighbor> = eligible
        .into_iter()
        .filter(|&idx| idx != target && !exclude.contains(&idx))
        .filter_map(|idx| store.get(idx))
        .map(|row| Neighbor {
            index: row.index,
            distance: distance(target_row, row, dims, store.filters()),
        })
        .collect();

    // Stable: equal distances keep row order
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    neighbors.truncate(k);
    neighbors
}

/// Z-score standardize each column: subtract mean, divide by population std
/// (floored to 1 when a column is constant).
pub fn standardize(raw: &[Vec<f64>], dim: usize) -> Vec<Vec<f64>> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }

    let mut means = vec![0.0_f64; dim];
    let mut vars = vec![0.0_f64; dim];

    for vec in raw {
        for (d, &val) in vec.iter().enumerate() {
            means[d] += val;
        }
    }
    for m in &mut means {
        *m /= n as f64;
    }

    for vec in raw {
        for (d, &val) in vec.iter().enumerate() {
            let diff = val - means[d];
            vars[d] += diff * diff;
        }
    }
    let stds: Vec<f64> = vars
        .iter()
        .map(|v| {
            let std = (v / n as f64).sqrt();
            if std > 0.0 && std.is_finite() { std } else { 1.0 }
        })
        .collect();

    raw.iter()
        .map(|vec| {
            vec.iter()
                .enumerate()
                .map(|(d, &val)| (val - means[d]) / stds[d])
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::make_store;

    fn dims(fields: &[Field]) -> Dimensions {
        Dimensions::from_fields(fields).unwrap()
    }

    #[test]
    fn test_distance_uses_absolute_range() {
        let mut store = make_store(&[
            &[(Field::Bpm, 100.0), (Field::Energy, 0.0)],
            &[(Field::Bpm, 200.0), (Field::Energy, 100.0)],
        ]);
        let d = dims(&[Field::Bpm, Field::Energy]);
        let rows = store.rows().to_vec();
        let full = distance(&rows[0], &rows[1], &d, store.filters());
        assert!((full - 2.0_f64.sqrt()).abs() < 1e-10);

        // Narrowing the slider must not change the metric
        store.filter_mut(Field::Bpm).set_max(150.0);
        let narrowed = distance(&rows[0], &rows[1], &d, store.filters());
        assert!((full - narrowed).abs() < 1e-12);
    }

    #[test]
    fn test_distance_skips_missing_and_is_symmetric() {
        let store = make_store(&[
            &[(Field::Bpm, 100.0), (Field::Energy, 20.0)],
            &[(Field::Bpm, 150.0)],
            &[(Field::Bpm, 200.0), (Field::Energy, 80.0)],
        ]);
        let d = dims(&[Field::Bpm, Field::Energy]);
        let rows = store.rows();
        // Row 1 has no Energy, so only BPM contributes: 50/100
        let d01 = distance(&rows[0], &rows[1], &d, store.filters());
        assert!((d01 - 0.5).abs() < 1e-10);

        for a in rows {
            for b in rows {
                let ab = distance(a, b, &d, store.filters());
                let ba = distance(b, a, &d, store.filters());
                assert_eq!(ab, ba);
            }
        }
    }

    #[test]
    fn test_distance_infinite_when_nothing_shared() {
        let store = make_store(&[&[(Field::Bpm, 100.0)], &[(Field::Energy, 50.0)]]);
        let rows = store.rows();
        let d = distance(&rows[0], &rows[1], &dims(&[Field::Bpm, Field::Energy]), store.filters());
        assert!(d.is_infinite());
        // Disabled dimensions don't count either
        let d = distance(&rows[0], &rows[0], &dims(&[Field::Energy]), store.filters());
        assert!(d.is_infinite());
    }

    #[test]
    fn test_nearest_neighbors_order_and_exclusions() {
        let store = make_store(&[
            &[(Field::Bpm, 100.0)],
            &[(Field::Bpm, 130.0)],
            &[(Field::Bpm, 105.0)],
            &[(Field::Bpm, 200.0)],
            &[(Field::Bpm, 110.0)],
        ]);
        let d = dims(&[Field::Bpm]);

        let result = nearest_neighbors(&store, 0, &HashSet::new(), 3, &d);
        let ids: Vec<usize> = result.iter().map(|n| n.index).collect();
        assert_eq!(ids, vec![2, 4, 1]);
        assert!(result.windows(2).all(|w| w[0].distance <= w[1].distance));

        let exclude: HashSet<usize> = [2].into_iter().collect();
        let ids: Vec<usize> = nearest_neighbors(&store, 0, &exclude, 10, &d)
            .iter()
            .map(|n| n.index)
            .collect();
        assert_eq!(ids, vec![4, 1, 3]);
        assert!(!ids.contains(&0));
    }

    #[test]
    fn test_nearest_neighbors_respect_filters() {
        let mut store = make_store(&[
            &[(Field::Bpm, 100.0)],
            &[(Field::Bpm, 102.0)],
            &[(Field::Bpm, 180.0)],
        ]);
        let d = dims(&[Field::Bpm]);
        store.filter_mut(Field::Bpm).set_max(150.0);

        let ids: Vec<usize> = nearest_neighbors(&store, 0, &HashSet::new(), 5, &d)
            .iter()
            .map(|n| n.index)
            .collect();
        assert_eq!(ids, vec![1]);

        // Filtered-out anchor
        assert!(nearest_neighbors(&store, 2, &HashSet::new(), 5, &d).is_empty());
    }

    #[test]
    fn test_dimensions_keep_one_enabled() {
        let mut d = dims(&[Field::Energy]);
        assert!(!d.toggle(Field::Energy));
        assert!(d.is_enabled(Field::Energy));
        assert!(d.toggle(Field::Bpm));
        assert_eq!(d.active(), vec![Field::Bpm, Field::Energy]);
        assert!(d.toggle(Field::Energy));
        assert_eq!(d.active(), vec![Field::Bpm]);
        assert!(Dimensions::from_fields(&[]).is_none());
    }

    #[test]
    fn test_standardize() {
        let raw = vec![vec![10.0, 100.0, 5.0], vec![20.0, 200.0, 5.0], vec![30.0, 300.0, 5.0]];
        let normed = standardize(&raw, 3);

        let mean_0: f64 = normed.iter().map(|v| v[0]).sum::<f64>() / 3.0;
        assert!(mean_0.abs() < 1e-10);
        // Different scales end up identical after standardization
        assert!((normed[0][0] - normed[0][1]).abs() < 1e-10);
        // Constant column: std floored to 1, so values become 0
        assert!(normed.iter().all(|v| v[2] == 0.0));
    }
}
