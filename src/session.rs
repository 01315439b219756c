//! The application state aggregate: rows, filters, view, selection, cluster
//! results and the cached scatter projection, owned in one place and mutated
//! only through the methods below.
//!
//! Nothing here is concurrent. Hazards are about staleness, so every mutation
//! that could leave derived state out of date either rebuilds it or flags it:
//!
//! - filter/search changes queue a view refresh, run by [`Session::tick`] at
//!   most once per tick
//! - row reloads, filter changes and dimension toggles reset cluster results
//! - eligibility changes re-arm the debounced cluster-count suggestion

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::CLUSTER_COUNT;
use crate::clustering::describe::describe_clusters;
use crate::clustering::elbow::{self, ElbowParams, Suggestion};
use crate::clustering::{self, ClusterError};
use crate::config::AppConfig;
use crate::export::{self, ExportError, ExportPlan};
use crate::scatter::{self, Projection};
use crate::scheduler::{Debouncer, FrameCoalescer};
use crate::similarity::{self, Dimensions, MAX_KNN_K, Neighbor};
use crate::store::RowStore;
use crate::store::models::Field;
use crate::view::{self, SortKey};

#[derive(Error, Debug, PartialEq)]
pub enum SessionError {
    #[error("Load a CSV before running this operation.")]
    NoRows,
    #[error("At least one dimension must remain enabled.")]
    LastDimension,
    #[error("Row {0} does not exist.")]
    UnknownRow(usize),
    #[error("Row {0} is filtered out and can't be used to find similar tracks.")]
    TargetFilteredOut(usize),
    #[error("No track is focused.")]
    NoFocus,
    #[error("No tracks have complete data for the selected dimensions.")]
    NoCompleteRows,
    #[error("k must be between 1 and {max} (got {got}).")]
    KnnOutOfRange { got: usize, max: usize },
    #[error("Cluster count must be between 1 and {max} (got {got}).")]
    ClusterCountOutOfRange { got: usize, max: usize },
    #[error("Clustering failed: {0}")]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Cluster results plus the requested count.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub ready: bool,
    /// Requested cluster count, 1..=palette size.
    pub target_k: usize,
    /// Set once the user picks a count; suggestions stop overriding it.
    pub target_explicit: bool,
    pub actual_k: usize,
    /// Members per palette slot.
    pub counts: Vec<usize>,
    /// Rows that took part (complete data for every active dimension).
    pub sample_size: usize,
    /// Eligible rows left out for missing data, in row order.
    pub skipped_rows: Vec<usize>,
    /// One description per palette slot.
    pub descriptions: Vec<String>,
    /// Dimensions the current result was computed on.
    pub dimensions: Vec<Field>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            ready: false,
            target_k: CLUSTER_COUNT,
            target_explicit: false,
            actual_k: 0,
            counts: vec![0; CLUSTER_COUNT],
            sample_size: 0,
            skipped_rows: Vec::new(),
            descriptions: vec![String::new(); CLUSTER_COUNT],
            dimensions: Vec::new(),
        }
    }
}

impl ClusterState {
    /// Drop results, keep the requested count.
    fn reset(&mut self) {
        *self = Self {
            target_k: self.target_k,
            target_explicit: self.target_explicit,
            ..Self::default()
        };
    }

    /// "K-means: 3 clusters • 120 tracks • 4 skipped"
    pub fn summary(&self) -> String {
        if !self.ready {
            return "No clusters yet.".to_string();
        }
        let mut parts = vec![
            plural(self.actual_k, "cluster"),
            plural(self.sample_size, "track"),
        ];
        if !self.skipped_rows.is_empty() {
            parts.push(format!("{} skipped", self.skipped_rows.len()));
        }
        format!("K-means: {}", parts.join(" • "))
    }
}

fn plural(n: usize, noun: &str) -> String {
    format!("{} {}{}", n, noun, if n == 1 { "" } else { "s" })
}

/// Outcome of a clustering run.
#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub actual_k: usize,
    pub sample_size: usize,
    pub skipped: usize,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub enum SuggestionStatus {
    /// Waiting for the debounce to settle (or never computed).
    Pending,
    /// Nothing to suggest, with the reason.
    Unavailable(String),
    Ready(Suggestion),
}

/// Scatter plot inputs and the cached projection.
#[derive(Debug)]
struct ScatterState {
    x: Field,
    y: Field,
    width: f64,
    projection: Option<Projection>,
    dirty: bool,
    hover: Option<usize>,
    focus: Option<usize>,
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub view_refreshed: bool,
    pub suggestion_updated: bool,
}

/// Rows eligible for clustering with complete data on every active field.
struct CompleteRows {
    rows: Vec<usize>,
    raw: Vec<Vec<f64>>,
    skipped: Vec<usize>,
}

pub struct Session {
    store: RowStore,
    search: String,
    sort: SortKey,
    view: Vec<usize>,
    dimensions: Dimensions,
    knn_k: usize,
    selected: BTreeSet<usize>,
    clusters: ClusterState,
    suggestion: SuggestionStatus,
    scatter: ScatterState,
    view_refresh: FrameCoalescer,
    suggestion_debounce: Debouncer,
    elbow: ElbowParams,
    rng: StdRng,
}

impl Session {
    pub fn new(config: &AppConfig) -> Self {
        let rng = match config.analytics.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let clusters = ClusterState {
            target_k: config.analytics.cluster_count.clamp(1, CLUSTER_COUNT),
            ..ClusterState::default()
        };

        Self {
            store: RowStore::default(),
            search: String::new(),
            sort: SortKey::default(),
            view: Vec::new(),
            dimensions: config.analytics.dimensions,
            knn_k: config.analytics.knn_k.clamp(1, MAX_KNN_K),
            selected: BTreeSet::new(),
            clusters,
            suggestion: SuggestionStatus::Pending,
            scatter: ScatterState {
                x: config.scatter.x,
                y: config.scatter.y,
                width: config.scatter.canvas_size,
                projection: None,
                dirty: true,
                hover: None,
                focus: None,
            },
            view_refresh: FrameCoalescer::default(),
            suggestion_debounce: Debouncer::new(config.suggestion.debounce()),
            elbow: config.suggestion.elbow_params(),
            rng,
        }
    }

    /// Replace all rows. Clears selection, clusters and focus; filters start wide open.
    pub fn load(&mut self, store: RowStore, now: Instant) {
        log::info!("Session loaded {} rows", store.len());
        self.store = store;
        self.selected.clear();
        self.scatter.focus = None;
        self.scatter.hover = None;
        self.reset_clusters();
        self.refresh_view();
        self.suggestion = SuggestionStatus::Pending;
        self.suggestion_debounce.touch(now);
    }

    // --- read-only snapshots -------------------------------------------------

    pub fn store(&self) -> &RowStore {
        &self.store
    }

    /// Current view: row indices passing search + filters, in sort order.
    pub fn view(&self) -> &[usize] {
        &self.view
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn sort(&self) -> &SortKey {
        &self.sort
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    pub fn knn_k(&self) -> usize {
        self.knn_k
    }

    pub fn selected(&self) -> &BTreeSet<usize> {
        &self.selected
    }

    pub fn clusters(&self) -> &ClusterState {
        &self.clusters
    }

    pub fn suggestion(&self) -> &SuggestionStatus {
        &self.suggestion
    }

    pub fn focus(&self) -> Option<usize> {
        self.scatter.focus
    }

    pub fn hover(&self) -> Option<usize> {
        self.scatter.hover
    }

    pub fn scatter_axes(&self) -> (Field, Field) {
        (self.scatter.x, self.scatter.y)
    }

    /// Whether a search or filter change is waiting for the next tick.
    pub fn view_is_stale(&self) -> bool {
        self.view_refresh.is_pending()
    }

    /// Whether the next [`Session::projection`] call will rebuild the points.
    pub fn projection_is_stale(&self) -> bool {
        self.scatter.dirty || self.scatter.projection.is_none()
    }

    /// Rows passing the sliders, ignoring the search box.
    pub fn filters_only(&self) -> Vec<usize> {
        view::filters_only(&self.store)
    }

    // --- filters, search, sort ----------------------------------------------

    /// Update the search text; the view catches up on the next tick.
    pub fn set_search(&mut self, raw: &str) {
        let query = view::normalize_query(raw);
        if query != self.search {
            self.search = query;
            self.view_refresh.request();
        }
    }

    pub fn set_filter_min(&mut self, field: Field, value: f64, now: Instant) {
        let before = *self.store.filter(field);
        self.store.filter_mut(field).set_min(value);
        if *self.store.filter(field) != before {
            self.filters_changed(now);
        }
    }

    pub fn set_filter_max(&mut self, field: Field, value: f64, now: Instant) {
        let before = *self.store.filter(field);
        self.store.filter_mut(field).set_max(value);
        if *self.store.filter(field) != before {
            self.filters_changed(now);
        }
    }

    pub fn reset_filters(&mut self, now: Instant) {
        if self.store.filters().iter().all(|r| r.is_reset()) {
            return;
        }
        self.store.reset_filters();
        self.filters_changed(now);
    }

    fn filters_changed(&mut self, now: Instant) {
        self.view_refresh.request();
        if self.clusters.ready {
            log::info!("Filters changed; clearing clusters");
            self.reset_clusters();
        }
        self.suggestion = SuggestionStatus::Pending;
        self.suggestion_debounce.touch(now);
    }

    /// Header click: same column flips direction, a new one sorts ascending.
    pub fn sort_by(&mut self, column: &str) {
        self.sort.toggle(column);
        self.refresh_view();
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
        self.refresh_view();
    }

    /// Rebuild the view from the current search, filters and sort.
    pub fn refresh_view(&mut self) {
        self.view = view::build_view(&self.store, &self.search, &self.sort);
        if let Some(focus) = self.scatter.focus {
            if !self.view.contains(&focus) {
                self.scatter.focus = None;
            }
        }
        self.scatter.dirty = true;
    }

    /// Run whatever is due: a queued view refresh, then a settled suggestion.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.view_refresh.take() {
            self.refresh_view();
            outcome.view_refreshed = true;
        }
        if self.suggestion_debounce.fire_if_ready(now) {
            self.update_suggestion();
            outcome.suggestion_updated = true;
        }
        outcome
    }

    // --- dimensions and parameters -------------------------------------------

    /// Flip a dimension. Existing clusters are cleared (they were computed on
    /// the old set); returns whether that happened.
    pub fn toggle_dimension(&mut self, field: Field, now: Instant) -> Result<bool> {
        if !self.dimensions.toggle(field) {
            return Err(SessionError::LastDimension);
        }
        log::info!(
            "{} {}",
            field,
            if self.dimensions.is_enabled(field) { "enabled" } else { "disabled" }
        );
        Ok(self.dimensions_changed(now))
    }

    /// Replace the whole dimension set.
    pub fn set_dimensions(&mut self, dimensions: Dimensions, now: Instant) -> bool {
        if dimensions == self.dimensions {
            return false;
        }
        self.dimensions = dimensions;
        self.dimensions_changed(now)
    }

    fn dimensions_changed(&mut self, now: Instant) -> bool {
        let cleared = self.clusters.ready;
        if cleared {
            log::info!("Cleared existing clusters after dimension change");
            self.reset_clusters();
        }
        self.scatter.dirty = true;
        self.suggestion = SuggestionStatus::Pending;
        self.suggestion_debounce.touch(now);
        cleared
    }

    pub fn set_knn_k(&mut self, k: usize) -> Result<()> {
        if !(1..=MAX_KNN_K).contains(&k) {
            return Err(SessionError::KnnOutOfRange {
                got: k,
                max: MAX_KNN_K,
            });
        }
        self.knn_k = k;
        Ok(())
    }

    /// Pin the requested cluster count. Suggestions no longer override it.
    pub fn set_cluster_target(&mut self, k: usize) -> Result<()> {
        if !(1..=CLUSTER_COUNT).contains(&k) {
            return Err(SessionError::ClusterCountOutOfRange {
                got: k,
                max: CLUSTER_COUNT,
            });
        }
        self.clusters.target_k = k;
        self.clusters.target_explicit = true;
        Ok(())
    }

    // --- selection -----------------------------------------------------------

    fn check_row(&self, row: usize) -> Result<()> {
        if self.store.is_empty() {
            return Err(SessionError::NoRows);
        }
        if self.store.get(row).is_none() {
            return Err(SessionError::UnknownRow(row));
        }
        Ok(())
    }

    /// Flip one row's selection; returns whether it is now selected.
    pub fn toggle_selection(&mut self, row: usize) -> Result<bool> {
        self.check_row(row)?;
        let now_selected = if self.selected.remove(&row) {
            false
        } else {
            self.selected.insert(row);
            true
        };
        self.sync_selection_flags();
        Ok(now_selected)
    }

    pub fn select_all_visible(&mut self) {
        self.selected.extend(self.view.iter().copied());
        self.sync_selection_flags();
    }

    pub fn deselect_all_visible(&mut self) {
        for row in &self.view {
            self.selected.remove(row);
        }
        self.sync_selection_flags();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
        self.sync_selection_flags();
    }

    /// Selection changes don't move points, so only the flags are patched.
    fn sync_selection_flags(&mut self) {
        if let Some(projection) = self.scatter.projection.as_mut() {
            for point in &mut projection.points {
                point.selected = self.selected.contains(&point.row);
            }
        }
    }

    // --- similarity ----------------------------------------------------------

    /// Nearest neighbours of `row` within the filters-only view.
    pub fn find_neighbors(&self, row: usize, exclude: &HashSet<usize>) -> Result<Vec<Neighbor>> {
        self.check_row(row)?;
        let eligible = self
            .store
            .get(row)
            .is_some_and(|r| view::passes_filters(r, self.store.filters()));
        if !eligible {
            return Err(SessionError::TargetFilteredOut(row));
        }
        Ok(similarity::nearest_neighbors(
            &self.store,
            row,
            exclude,
            self.knn_k,
            &self.dimensions,
        ))
    }

    /// "Find similar": select `row` and its nearest unselected neighbours.
    /// Returns how many neighbours were newly added.
    pub fn select_neighbors(&mut self, row: usize) -> Result<usize> {
        let mut exclude: HashSet<usize> = self.selected.iter().copied().collect();
        exclude.insert(row);
        let neighbors = self.find_neighbors(row, &exclude)?;

        self.selected.insert(row);
        let mut added = 0;
        for n in &neighbors {
            if self.selected.insert(n.index) {
                added += 1;
            }
        }
        self.sync_selection_flags();
        log::info!(
            "Added {} neighbouring track{}",
            added,
            if added == 1 { "" } else { "s" }
        );
        Ok(added)
    }

    pub fn select_neighbors_of_focus(&mut self) -> Result<usize> {
        let row = self.scatter.focus.ok_or(SessionError::NoFocus)?;
        self.select_neighbors(row)
    }

    // --- clustering ----------------------------------------------------------

    fn complete_rows(&self, fields: &[Field]) -> CompleteRows {
        let mut out = CompleteRows {
            rows: Vec::new(),
            raw: Vec::new(),
            skipped: Vec::new(),
        };
        for idx in view::filters_only(&self.store) {
            let Some(row) = self.store.get(idx) else {
                continue;
            };
            let vector: Option<Vec<f64>> = fields.iter().map(|&f| row.value(f)).collect();
            match vector {
                Some(v) => {
                    out.rows.push(idx);
                    out.raw.push(v);
                }
                None => out.skipped.push(idx),
            }
        }
        out
    }

    fn reset_clusters(&mut self) {
        self.store.clear_clusters();
        self.clusters.reset();
        self.scatter.dirty = true;
    }

    /// Cluster the filters-only rows on the active dimensions.
    ///
    /// Rows missing any active value are skipped. With no usable rows at all
    /// the cluster state is reset and an error returned.
    pub fn run_clustering(&mut self) -> Result<ClusterRun> {
        if self.store.is_empty() {
            return Err(SessionError::NoRows);
        }

        let fields = self.dimensions.active();
        let complete = self.complete_rows(&fields);
        if complete.rows.is_empty() {
            self.reset_clusters();
            log::warn!("No tracks have complete data for {:?}", fields);
            return Err(SessionError::NoCompleteRows);
        }

        let dims = fields.len();
        let vectors = similarity::standardize(&complete.raw, dims);
        let fit = match clustering::kmeans(
            &vectors,
            dims,
            self.clusters.target_k,
            clustering::DEFAULT_MAX_ITERATIONS,
            &mut self.rng,
        ) {
            Ok(fit) => fit,
            Err(e) => {
                self.reset_clusters();
                return Err(e.into());
            }
        };

        let mut counts = fit.counts();
        counts.resize(CLUSTER_COUNT, 0);
        let descriptions = describe_clusters(&fields, &complete.raw, &fit.assignments, fit.k, CLUSTER_COUNT);

        let pairs: Vec<(usize, usize)> = complete
            .rows
            .iter()
            .copied()
            .zip(fit.assignments.iter().copied())
            .collect();
        self.store.set_clusters(&pairs);

        self.clusters = ClusterState {
            ready: true,
            target_k: self.clusters.target_k,
            target_explicit: self.clusters.target_explicit,
            actual_k: fit.k,
            counts,
            sample_size: complete.rows.len(),
            skipped_rows: complete.skipped.clone(),
            descriptions,
            dimensions: fields.clone(),
        };
        self.scatter.dirty = true;

        log::info!(
            "K-means assigned {} to {}{} using {} ({})",
            plural(fit.k, "cluster"),
            plural(complete.rows.len(), "track"),
            if !complete.skipped.is_empty() {
                format!(" ({} skipped)", complete.skipped.len())
            } else {
                String::new()
            },
            plural(dims, "dimension"),
            fields.iter().map(|f| f.column()).collect::<Vec<_>>().join(", ")
        );

        Ok(ClusterRun {
            actual_k: fit.k,
            sample_size: complete.rows.len(),
            skipped: complete.skipped.len(),
            iterations: fit.iterations,
            converged: fit.converged,
        })
    }

    /// Recompute the cluster-count suggestion now. Normally driven by [`Session::tick`].
    pub fn update_suggestion(&mut self) -> &SuggestionStatus {
        self.suggestion = self.compute_suggestion();
        if let SuggestionStatus::Ready(s) = &self.suggestion {
            if !self.clusters.target_explicit {
                self.clusters.target_k = s.k.clamp(1, CLUSTER_COUNT);
            }
        }
        &self.suggestion
    }

    fn compute_suggestion(&mut self) -> SuggestionStatus {
        if self.store.is_empty() {
            return SuggestionStatus::Unavailable("Load tracks to get a cluster suggestion.".into());
        }
        let fields = self.dimensions.active();
        let complete = self.complete_rows(&fields);
        if complete.rows.is_empty() {
            return SuggestionStatus::Unavailable(SessionError::NoCompleteRows.to_string());
        }

        let vectors = similarity::standardize(&complete.raw, fields.len());
        match elbow::suggest_cluster_count(&vectors, fields.len(), &self.elbow, &mut self.rng) {
            Ok(Some(s)) => {
                log::info!("Suggested {} for {} sampled rows", plural(s.k, "cluster"), s.sample_size);
                SuggestionStatus::Ready(s)
            }
            Ok(None) => SuggestionStatus::Unavailable(SessionError::NoCompleteRows.to_string()),
            Err(e) => {
                log::warn!("Cluster suggestion failed: {}", e);
                SuggestionStatus::Unavailable(e.to_string())
            }
        }
    }

    // --- scatter -------------------------------------------------------------

    pub fn set_scatter_axes(&mut self, x: Field, y: Field) {
        if (x, y) != (self.scatter.x, self.scatter.y) {
            self.scatter.x = x;
            self.scatter.y = y;
            self.scatter.dirty = true;
        }
    }

    pub fn set_canvas_width(&mut self, width: f64) {
        if scatter::canvas_size(width) != scatter::canvas_size(self.scatter.width) {
            self.scatter.dirty = true;
        }
        self.scatter.width = width;
    }

    /// Current projection, rebuilt only when its inputs changed.
    pub fn projection(&mut self) -> &Projection {
        if self.scatter.dirty {
            self.scatter.projection = None;
            self.scatter.dirty = false;
        }
        let (store, view, selected) = (&self.store, &self.view, &self.selected);
        let (x, y, width) = (self.scatter.x, self.scatter.y, self.scatter.width);
        self.scatter
            .projection
            .get_or_insert_with(|| scatter::project(store, view, x, y, width, selected))
    }

    /// Pointer moved: update the hovered row. Returns whether it changed.
    pub fn hover_at(&mut self, x: f64, y: f64) -> bool {
        let hit = scatter::find_point_at(&self.projection().points, x, y).map(|p| p.row);
        let changed = hit != self.scatter.hover;
        self.scatter.hover = hit;
        changed
    }

    pub fn clear_hover(&mut self) {
        self.scatter.hover = None;
    }

    /// Click: focus the hit row and toggle its selection. Returns the row, if any.
    pub fn activate_at(&mut self, x: f64, y: f64) -> Result<Option<usize>> {
        let Some(row) = scatter::find_point_at(&self.projection().points, x, y).map(|p| p.row) else {
            return Ok(None);
        };
        self.scatter.focus = Some(row);
        self.toggle_selection(row)?;
        Ok(Some(row))
    }

    // --- export --------------------------------------------------------------

    pub fn selection_plan(&self, base: &str) -> Result<ExportPlan> {
        Ok(export::selection_plan(&self.store, &self.selected, base)?)
    }

    pub fn cluster_plan(&self, base: &str) -> Result<ExportPlan> {
        Ok(export::cluster_plan(&self.store, &self.clusters, base)?)
    }
}
