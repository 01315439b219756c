//! 2-D projection of two numeric fields onto a square plot: axis scaling,
//! "nice" gridline ticks, point placement and hit-testing. Pure geometry; the
//! caller decides how to paint it.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::store::RowStore;
use crate::store::models::{Field, FilterRange};
use crate::{CLUSTER_COLORS, CLUSTER_COUNT};

/// Inset between the canvas edge and the plot area, in pixels.
pub const PADDING: f64 = 42.0;
pub const DEFAULT_CANVAS: f64 = 520.0;
pub const MAX_CANVAS: f64 = 720.0;
/// Pointer must land within this many pixels of a point to hit it.
pub const HIT_RADIUS: f64 = 10.0;
/// Hard cap on ticks per axis.
pub const MAX_TICKS: usize = 50;
/// Raw span is divided by this before nice-rounding the step.
const TICK_INTERVALS: f64 = 4.0;
/// Step doublings tried before giving up on a nice grid.
const MAX_WIDENINGS: usize = 64;
/// Axis bounds are clamped to this so the span always fits in an f64.
const DOMAIN_LIMIT: f64 = f64::MAX / 4.0;

/// Round `x` to 1, 2, 5 or 10 times a power of ten.
pub fn nice_number(x: f64, round: bool) -> f64 {
    if x <= 0.0 || !x.is_finite() {
        return 1.0;
    }
    let exponent = x.log10().floor();
    let magnitude = 10f64.powf(exponent);
    let fraction = x / magnitude;
    let nice = if round {
        if fraction < 1.5 {
            1.0
        } else if fraction < 3.0 {
            2.0
        } else if fraction < 7.0 {
            5.0
        } else {
            10.0
        }
    } else if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

/// One plot axis: its data domain and the tick grid covering it.
#[derive(Debug, Clone, Serialize)]
pub struct Axis {
    pub field: Field,
    pub domain_min: f64,
    pub domain_max: f64,
    pub step: f64,
    pub ticks: Vec<f64>,
}

impl Axis {
    /// Axis over a field's absolute range (the slider window is ignored).
    pub fn for_range(field: Field, range: &FilterRange) -> Self {
        Self::from_domain(field, range.absolute_min, range.absolute_max)
    }

    pub fn from_domain(field: Field, lo: f64, hi: f64) -> Self {
        let (mut lo, mut hi) = if lo.is_finite() && hi.is_finite() {
            (
                lo.min(hi).clamp(-DOMAIN_LIMIT, DOMAIN_LIMIT),
                lo.max(hi).clamp(-DOMAIN_LIMIT, DOMAIN_LIMIT),
            )
        } else {
            (0.0, 100.0)
        };
        if lo == hi {
            // Past 1e9 a pad of 1 is lost to rounding
            let pad = (lo.abs() * 1e-9).max(1.0);
            lo -= pad;
            hi += pad;
        }

        let (step, ticks) = nice_ticks(lo, hi);
        Self {
            field,
            domain_min: lo,
            domain_max: hi,
            step,
            ticks,
        }
    }

    /// Lowest tick; the plot's lower edge.
    pub fn min(&self) -> f64 {
        self.ticks.first().copied().unwrap_or(self.domain_min)
    }

    /// Highest tick; the plot's upper edge.
    pub fn max(&self) -> f64 {
        self.ticks.last().copied().unwrap_or(self.domain_max)
    }

    /// Position of `value` along the axis in [0, 1]; out-of-range values are clipped.
    pub fn unit(&self, value: f64) -> f64 {
        let span = self.max() - self.min();
        if span <= 0.0 {
            return 0.5;
        }
        ((value - self.min()) / span).clamp(0.0, 1.0)
    }
}

/// Step and tick values spanning [lo, hi]. Requires lo < hi with a finite span.
fn nice_ticks(lo: f64, hi: f64) -> (f64, Vec<f64>) {
    let mut step = nice_number((hi - lo) / TICK_INTERVALS, true);

    // Counted in f64 so huge or tiny ratios can't overflow an integer
    let mut first = (lo / step).floor();
    let mut last = (hi / step).ceil();
    let mut widenings = 0;
    while !(last - first + 1.0 <= MAX_TICKS as f64) {
        widenings += 1;
        let wider = nice_number(step * 2.0, false);
        if widenings > MAX_WIDENINGS || !wider.is_finite() || wider <= step {
            return (hi - lo, vec![lo, hi]);
        }
        step = wider;
        first = (lo / step).floor();
        last = (hi / step).ceil();
    }

    let count = (last - first + 1.0).max(1.0) as usize;
    let mut ticks: Vec<f64> = (0..count).map(|i| (first + i as f64) * step).collect();
    // Float error can leave the end ticks a hair inside the domain
    if ticks.first().is_some_and(|&t| t > lo) {
        ticks.insert(0, (first - 1.0) * step);
    }
    if ticks.last().is_some_and(|&t| t < hi) {
        ticks.push((last + 1.0) * step);
    }
    ticks.truncate(MAX_TICKS);
    (step, ticks)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectionPoint {
    pub x: f64,
    pub y: f64,
    pub row: usize,
    pub cluster: Option<usize>,
    pub color: Option<&'static str>,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Projection {
    /// Square canvas edge length in pixels.
    pub size: f64,
    pub padding: f64,
    pub x_axis: Axis,
    pub y_axis: Axis,
    pub points: Vec<ProjectionPoint>,
}

/// Canvas edge for a container width: capped, with a default for unknown widths.
pub fn canvas_size(width: f64) -> f64 {
    if width > 0.0 && width.is_finite() {
        width.min(MAX_CANVAS)
    } else {
        DEFAULT_CANVAS
    }
}

/// Project the rows of `view` onto the (x, y) field pair. Rows missing either
/// value are left out.
pub fn project(
    store: &RowStore,
    view: &[usize],
    x_field: Field,
    y_field: Field,
    width: f64,
    selected: &BTreeSet<usize>,
) -> Projection {
    let size = canvas_size(width);
    let plot = (size - 2.0 * PADDING).max(0.0);
    let x_axis = Axis::for_range(x_field, store.filter(x_field));
    let y_axis = Axis::for_range(y_field, store.filter(y_field));

    let points = view
        .iter()
        .filter_map(|&idx| store.get(idx))
        .filter_map(|row| {
            let (Some(xv), Some(yv)) = (row.value(x_field), row.value(y_field)) else {
                return None;
            };
            let cluster = row.cluster.filter(|&c| c < CLUSTER_COUNT);
            Some(ProjectionPoint {
                x: PADDING + x_axis.unit(xv) * plot,
                y: size - PADDING - y_axis.unit(yv) * plot,
                row: row.index,
                cluster,
                color: cluster.map(|c| CLUSTER_COLORS[c]),
                selected: selected.contains(&row.index),
            })
        })
        .collect();

    Projection {
        size,
        padding: PADDING,
        x_axis,
        y_axis,
        points,
    }
}

/// Nearest point strictly within [`HIT_RADIUS`] of (x, y).
pub fn find_point_at(points: &[ProjectionPoint], x: f64, y: f64) -> Option<&ProjectionPoint> {
    let mut best = None;
    let mut best_dist = HIT_RADIUS;
    for point in points {
        let dist = (point.x - x).hypot(point.y - y);
        if dist < best_dist {
            best_dist = dist;
            best = Some(point);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::make_store;

    #[test]
    fn test_nice_number() {
        assert_eq!(nice_number(25.0, true), 20.0);
        assert_eq!(nice_number(0.37, true), 0.5);
        assert_eq!(nice_number(8.0, true), 10.0);
        assert_eq!(nice_number(1.2, true), 1.0);
        assert_eq!(nice_number(0.0, true), 1.0);
        assert_eq!(nice_number(3.0, false), 5.0);
    }

    #[test]
    fn test_ticks_cover_domain() {
        for (lo, hi) in [(0.0, 100.0), (63.0, 187.0), (-0.3, 0.7), (0.1, 0.3), (1e-3, 5e6), (42.0, 42.0)] {
            let axis = Axis::from_domain(Field::Bpm, lo, hi);
            assert!(axis.step > 0.0);
            assert!(axis.ticks.len() >= 2 && axis.ticks.len() <= MAX_TICKS);
            assert!(axis.ticks[0] <= axis.domain_min, "{:?}", axis);
            assert!(*axis.ticks.last().unwrap() >= axis.domain_max, "{:?}", axis);
        }
    }

    #[test]
    fn test_standard_axis() {
        let axis = Axis::from_domain(Field::Energy, 0.0, 100.0);
        assert_eq!(axis.step, 20.0);
        assert_eq!(axis.ticks, vec![0.0, 20.0, 40.0, 60.0, 80.0, 100.0]);
    }

    #[test]
    fn test_degenerate_domain_expands() {
        let axis = Axis::from_domain(Field::Energy, 50.0, 50.0);
        assert_eq!(axis.domain_min, 49.0);
        assert_eq!(axis.domain_max, 51.0);
    }

    #[test]
    fn test_extreme_domain_stays_bounded() {
        for (lo, hi) in [(-1.0e308, 1.0e308), (f64::MIN, f64::MAX), (1.0e300, 1.0e300), (0.0, 1.0e308)] {
            let axis = Axis::from_domain(Field::Bpm, lo, hi);
            assert!(axis.step.is_finite() && axis.step > 0.0, "{:?}", axis);
            assert!(axis.ticks.len() >= 2 && axis.ticks.len() <= MAX_TICKS, "{:?}", axis);
            assert!(axis.ticks.iter().all(|t| t.is_finite()));
            assert!(axis.domain_min < axis.domain_max);
            assert!(axis.ticks[0] <= axis.domain_min);
            assert!(*axis.ticks.last().unwrap() >= axis.domain_max);
        }
    }

    #[test]
    fn test_project_huge_values() {
        // 309-digit cells still parse as finite numbers
        let store = make_store(&[
            &[(Field::Bpm, 1.0e308), (Field::Energy, 10.0)],
            &[(Field::Bpm, -1.0e308), (Field::Energy, 20.0)],
        ]);
        assert_eq!(store.get(0).unwrap().value(Field::Bpm), Some(1.0e308));

        let proj = project(&store, &[0, 1], Field::Bpm, Field::Energy, 520.0, &BTreeSet::new());
        assert_eq!(proj.points.len(), 2);
        for p in &proj.points {
            assert!(p.x >= PADDING && p.x <= proj.size - PADDING, "{:?}", p);
            assert!(p.y >= PADDING && p.y <= proj.size - PADDING, "{:?}", p);
        }
        assert!(proj.points[0].x > proj.points[1].x);
    }

    #[test]
    fn test_unit_clamps() {
        let axis = Axis::from_domain(Field::Energy, 0.0, 100.0);
        assert_eq!(axis.unit(50.0), 0.5);
        assert_eq!(axis.unit(-10.0), 0.0);
        assert_eq!(axis.unit(250.0), 1.0);
    }

    #[test]
    fn test_project_points() {
        let mut store = make_store(&[
            &[(Field::Valence, 0.0), (Field::Energy, 0.0)],
            &[(Field::Valence, 100.0), (Field::Energy, 100.0)],
            &[(Field::Valence, 50.0)],
        ]);
        store.set_clusters(&[(1, 2)]);
        let selected: BTreeSet<usize> = [0].into_iter().collect();
        let proj = project(&store, &[1, 0, 2], Field::Valence, Field::Energy, 1000.0, &selected);

        assert_eq!(proj.size, MAX_CANVAS);
        // Row 2 lacks Energy
        assert_eq!(proj.points.len(), 2);
        let p1 = &proj.points[0];
        assert_eq!(p1.row, 1);
        assert_eq!(p1.x, MAX_CANVAS - PADDING);
        assert_eq!(p1.y, PADDING);
        assert_eq!(p1.cluster, Some(2));
        assert_eq!(p1.color, Some(CLUSTER_COLORS[2]));
        let p0 = &proj.points[1];
        assert_eq!((p0.x, p0.y), (PADDING, MAX_CANVAS - PADDING));
        assert!(p0.selected);
        assert_eq!(p0.color, None);
    }

    #[test]
    fn test_find_point_at() {
        let points = vec![
            ProjectionPoint { x: 100.0, y: 100.0, row: 0, cluster: None, color: None, selected: false },
            ProjectionPoint { x: 106.0, y: 100.0, row: 1, cluster: None, color: None, selected: false },
        ];
        assert_eq!(find_point_at(&points, 104.0, 100.0).map(|p| p.row), Some(1));
        assert_eq!(find_point_at(&points, 98.0, 101.0).map(|p| p.row), Some(0));
        assert!(find_point_at(&points, 130.0, 100.0).is_none());
        assert!(find_point_at(&points, 90.0, 100.0).is_none());
    }
}
