//! Filter & view pipeline: range filters + text search + sort.
//!
//! Views are plain lists of row indices, rebuilt from scratch on every change.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::store::RowStore;
use crate::store::models::{Field, FilterRange, TrackRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flip(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Active sort: any normalized column name plus a direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

impl Default for SortKey {
    fn default() -> Self {
        Self {
            column: "Title".to_string(),
            direction: SortDirection::Asc,
        }
    }
}

impl SortKey {
    /// Header-click behaviour: same column flips direction, a new column starts ascending.
    pub fn toggle(&mut self, column: &str) {
        if self.column == column {
            self.direction = self.direction.flip();
        } else {
            self.column = column.to_string();
            self.direction = SortDirection::Asc;
        }
    }
}

/// Normalize raw search box input: trimmed and lowercased.
pub fn normalize_query(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Range test over all six fields. Absent values never fail their field's filter.
pub fn passes_filters(row: &TrackRow, filters: &[FilterRange; 6]) -> bool {
    Field::ALL.iter().all(|&field| match row.value(field) {
        Some(v) => filters[field.index()].contains(v),
        None => true,
    })
}

/// Substring test against the row's search key. `query` must already be normalized.
pub fn matches_search(row: &TrackRow, query: &str) -> bool {
    query.is_empty() || row.search_key.contains(query)
}

/// Rows passing the range filters only, in row-index order. The text search is
/// deliberately ignored: this is the scope for clustering and neighbour search.
pub fn filters_only(store: &RowStore) -> Vec<usize> {
    store
        .rows()
        .iter()
        .filter(|row| passes_filters(row, store.filters()))
        .map(|row| row.index)
        .collect()
}

/// The visible view: search + filters, ordered by `sort`.
pub fn build_view(store: &RowStore, query: &str, sort: &SortKey) -> Vec<usize> {
    let mut rows: Vec<&TrackRow> = store
        .rows()
        .iter()
        .filter(|row| matches_search(row, query) && passes_filters(row, store.filters()))
        .collect();

    let numeric: Option<Field> = sort.column.parse().ok();
    rows.sort_by(|a, b| {
        let cmp = match numeric {
            Some(field) => compare_values(a.value(field), b.value(field)),
            None => compare_cells(a.column(&sort.column), b.column(&sort.column)),
        };
        match sort.direction {
            SortDirection::Asc => cmp,
            SortDirection::Desc => cmp.reverse(),
        }
    });

    rows.into_iter().map(|row| row.index).collect()
}

/// Parsed numeric field values; rows missing the value sort first.
pub fn compare_values(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

/// Numeric comparison when both cells are numbers, natural case-insensitive text otherwise.
pub fn compare_cells(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) if x.is_finite() && y.is_finite() => {
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => natural_cmp(a, b),
    }
}

/// Case-insensitive comparison treating runs of ASCII digits as numbers ("Track 2" < "Track 10").
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
    let b: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let run_a: String = a[start_a..i].iter().collect();
            let run_b: String = b[start_b..j].iter().collect();
            let trimmed_a = run_a.trim_start_matches('0');
            let trimmed_b = run_b.trim_start_matches('0');
            let ord = trimmed_a
                .len()
                .cmp(&trimmed_b.len())
                .then_with(|| trimmed_a.cmp(trimmed_b));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            match a[i].cmp(&b[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                ord => return ord,
            }
        }
    }

    (a.len() - i).cmp(&(b.len() - j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{make_row, make_store};

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("Track 2", "Track 10"), Ordering::Less);
        assert_eq!(natural_cmp("abc", "ABC"), Ordering::Equal);
        assert_eq!(natural_cmp("alpha", "Beta"), Ordering::Less);
        assert_eq!(natural_cmp("a", "ab"), Ordering::Less);
        assert_eq!(natural_cmp("x007", "x7"), Ordering::Equal);
    }

    #[test]
    fn test_compare_cells_numeric_first() {
        assert_eq!(compare_cells("9", "10"), Ordering::Less);
        assert_eq!(compare_cells("2.5", "-1"), Ordering::Greater);
        // Mixed: falls back to text
        assert_eq!(compare_cells("10", "abc"), Ordering::Less);
        assert_eq!(compare_cells("", "1"), Ordering::Less);
    }

    #[test]
    fn test_absent_values_never_filtered() {
        let mut store = make_store(&[
            &[(Field::Bpm, 100.0), (Field::Energy, 10.0)],
            &[(Field::Bpm, 150.0)],
            &[(Field::Energy, 90.0)],
        ]);
        store.filter_mut(Field::Energy).set_min(50.0);
        // Row 0 fails Energy; row 1 has no Energy; row 2 passes
        assert_eq!(filters_only(&store), vec![1, 2]);

        store.filter_mut(Field::Bpm).set_max(120.0);
        assert_eq!(filters_only(&store), vec![2]);
    }

    #[test]
    fn test_inclusive_bounds() {
        let mut store = make_store(&[&[(Field::Dance, 40.0)], &[(Field::Dance, 60.0)]]);
        store.filter_mut(Field::Dance).set_min(40.0);
        store.filter_mut(Field::Dance).set_max(60.0);
        assert_eq!(filters_only(&store), vec![0, 1]);
    }

    #[test]
    fn test_search_and_sort() {
        let rows = vec![
            make_row(0, "Sugaree", &[(Field::Bpm, 90.0)]),
            make_row(1, "Shakedown Street", &[(Field::Bpm, 115.0)]),
            make_row(2, "Scarlet Begonias", &[(Field::Bpm, 101.0)]),
        ];
        let store = RowStore::new(rows).unwrap();

        let by_title = build_view(&store, "", &SortKey::default());
        assert_eq!(by_title, vec![2, 1, 0]);

        let mut sort = SortKey {
            column: "BPM".to_string(),
            direction: SortDirection::Asc,
        };
        assert_eq!(build_view(&store, "", &sort), vec![0, 2, 1]);
        sort.toggle("BPM");
        assert_eq!(build_view(&store, "", &sort), vec![1, 2, 0]);

        let query = normalize_query("  STREET ");
        assert_eq!(build_view(&store, &query, &sort), vec![1]);
        // Search key covers artist too
        assert_eq!(build_view(&store, "test artist", &sort).len(), 3);
        assert!(build_view(&store, "strett", &sort).is_empty());
    }

    #[test]
    fn test_numeric_columns_sort_by_parsed_value() {
        let row = |index: usize, energy: Option<&str>| {
            let mut columns = std::collections::BTreeMap::new();
            columns.insert("Title".to_string(), format!("Track {}", index));
            if let Some(energy) = energy {
                columns.insert("Energy".to_string(), energy.to_string());
            }
            TrackRow::from_columns(index, columns)
        };
        let store = RowStore::new(vec![
            row(0, Some("-10 dB")),
            row(1, Some("-5 dB")),
            row(2, Some("-20 dB")),
            row(3, None),
        ])
        .unwrap();

        let mut sort = SortKey {
            column: "Energy".to_string(),
            direction: SortDirection::Asc,
        };
        assert_eq!(build_view(&store, "", &sort), vec![3, 2, 0, 1]);
        sort.toggle("Energy");
        assert_eq!(build_view(&store, "", &sort), vec![1, 0, 2, 3]);

        assert_eq!(compare_values(None, Some(-1.0)), Ordering::Less);
        assert_eq!(compare_values(Some(2.0), Some(2.0)), Ordering::Equal);
    }

    #[test]
    fn test_filters_only_ignores_search() {
        let store = make_store(&[&[], &[]]);
        assert_eq!(build_view(&store, "track 1", &SortKey::default()), vec![1]);
        assert_eq!(filters_only(&store), vec![0, 1]);
    }

    #[test]
    fn test_sort_toggle_new_column_resets_direction() {
        let mut sort = SortKey {
            column: "BPM".to_string(),
            direction: SortDirection::Desc,
        };
        sort.toggle("Energy");
        assert_eq!(sort.column, "Energy");
        assert_eq!(sort.direction, SortDirection::Asc);
    }
}
