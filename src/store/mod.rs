pub mod models;

use thiserror::Error;

use models::{Field, FilterRange, TrackRow};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("row at position {position} has index {index}; indices must be dense from 0")]
    IndexMismatch { position: usize, index: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Loaded track rows plus one filter range per numeric field.
///
/// The row list is finalized at construction; filtering and sorting never
/// reorder or renumber it, so `rows[i].index == i` always holds.
#[derive(Debug, Clone)]
pub struct RowStore {
    rows: Vec<TrackRow>,
    filters: [FilterRange; 6],
}

impl Default for RowStore {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            filters: [FilterRange::from_values(std::iter::empty()); 6],
        }
    }
}

impl RowStore {
    /// Take ownership of the ingested rows and bootstrap the filter ranges from them.
    pub fn new(rows: Vec<TrackRow>) -> Result<Self> {
        for (position, row) in rows.iter().enumerate() {
            if row.index != position {
                return Err(StoreError::IndexMismatch {
                    position,
                    index: row.index,
                });
            }
        }

        let filters = Field::ALL.map(|field| {
            FilterRange::from_values(rows.iter().filter_map(|r| r.value(field)))
        });

        log::debug!("Row store ready: {} rows", rows.len());
        Ok(Self { rows, filters })
    }

    pub fn rows(&self) -> &[TrackRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrackRow> {
        self.rows.get(index)
    }

    pub fn filter(&self, field: Field) -> &FilterRange {
        &self.filters[field.index()]
    }

    pub fn filters(&self) -> &[FilterRange; 6] {
        &self.filters
    }

    pub fn filter_mut(&mut self, field: Field) -> &mut FilterRange {
        &mut self.filters[field.index()]
    }

    pub fn reset_filters(&mut self) {
        for range in &mut self.filters {
            range.reset();
        }
    }

    /// Write cluster slots back onto the rows. Rows absent from `assignments` are cleared.
    pub fn set_clusters(&mut self, assignments: &[(usize, usize)]) {
        self.clear_clusters();
        for &(index, cluster) in assignments {
            if let Some(row) = self.rows.get_mut(index) {
                row.cluster = Some(cluster);
            }
        }
    }

    pub fn clear_clusters(&mut self) {
        for row in &mut self.rows {
            row.cluster = None;
        }
    }
}
