use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use trackmap::config::AppConfig;
use trackmap::session::{Session, SuggestionStatus};
use trackmap::similarity::Dimensions;
use trackmap::store::models::{Field, TrackRow};
use trackmap::view::{SortDirection, SortKey};

#[derive(Parser)]
#[command(name = "trackmap", version, about = "Filter, compare and cluster music-track exports")]
struct Cli {
    /// CSV export to load (defaults to config csv_path, then ./songs.csv)
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldArg {
    Bpm,
    Energy,
    #[value(alias = "danceability")]
    Dance,
    Valence,
    #[value(alias = "acousticness")]
    Acoustic,
    #[value(alias = "pop")]
    Popularity,
}

impl FieldArg {
    fn field(self) -> Field {
        match self {
            Self::Bpm => Field::Bpm,
            Self::Energy => Field::Energy,
            Self::Dance => Field::Dance,
            Self::Valence => Field::Valence,
            Self::Acoustic => Field::Acoustic,
            Self::Popularity => Field::Popularity,
        }
    }
}

/// `FIELD=MIN:MAX`; either bound may be left empty.
#[derive(Clone, Debug)]
struct FilterSpec {
    field: Field,
    min: Option<f64>,
    max: Option<f64>,
}

fn parse_filter(raw: &str) -> Result<FilterSpec, String> {
    let (field, range) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=MIN:MAX, got '{}'", raw))?;
    let field: Field = field.trim().parse()?;
    let (lo, hi) = range
        .split_once(':')
        .ok_or_else(|| format!("expected MIN:MAX after '=', got '{}'", range))?;
    let bound = |s: &str| -> Result<Option<f64>, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<f64>()
            .map(Some)
            .map_err(|e| format!("bad bound '{}': {}", s, e))
    };
    Ok(FilterSpec {
        field,
        min: bound(lo)?,
        max: bound(hi)?,
    })
}

/// Options shared by every analytics subcommand.
#[derive(Args)]
struct Scope {
    /// Range filter, FIELD=MIN:MAX (repeatable; either bound may be empty)
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<FilterSpec>,

    /// Dimensions for similarity and clustering (repeatable; defaults to config)
    #[arg(short, long = "dim", value_enum)]
    dims: Vec<FieldArg>,

    /// Fixed RNG seed for reproducible clustering
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracks passing the search and filters
    View {
        /// Search text (title, artist, release)
        #[arg(short, long)]
        search: Option<String>,

        /// Sort column (any CSV header, e.g. Title, BPM, Popularity)
        #[arg(long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Number of results
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        #[command(flatten)]
        scope: Scope,
    },

    /// Find the nearest neighbours of a track
    Similar {
        /// Row index, or a title substring
        track: String,

        /// Number of neighbours
        #[arg(short)]
        k: Option<usize>,

        #[command(flatten)]
        scope: Scope,
    },

    /// Cluster the filtered tracks with k-means
    Cluster {
        /// Cluster count (defaults to the elbow suggestion, then config)
        #[arg(short)]
        k: Option<usize>,

        /// List members of each cluster
        #[arg(long)]
        members: bool,

        #[command(flatten)]
        scope: Scope,
    },

    /// Suggest a cluster count from the elbow of the inertia curve
    Suggest {
        #[command(flatten)]
        scope: Scope,
    },

    /// Project the filtered tracks onto two fields
    Scatter {
        /// Horizontal axis
        #[arg(short = 'x', long, value_enum)]
        x: Option<FieldArg>,

        /// Vertical axis
        #[arg(short = 'y', long, value_enum)]
        y: Option<FieldArg>,

        /// Container width in pixels
        #[arg(long)]
        width: Option<f64>,

        /// Colour points by cluster (runs k-means first)
        #[arg(long)]
        cluster: bool,

        /// Print the projection as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        scope: Scope,
    },

    /// Print a playlist export plan as JSON
    Export {
        /// Base playlist name
        #[arg(long, default_value = trackmap::export::DEFAULT_PLAYLIST_NAME)]
        name: String,

        /// One playlist per cluster instead of the selection
        #[arg(long)]
        clusters: bool,

        /// Cluster count for --clusters
        #[arg(short)]
        k: Option<usize>,

        /// Row indices to select
        #[arg(long = "row")]
        rows: Vec<usize>,

        /// Select every track matching this search (and the filters)
        #[arg(short, long)]
        search: Option<String>,

        #[command(flatten)]
        scope: Scope,
    },
}

impl Commands {
    fn scope(&self) -> &Scope {
        match self {
            Self::View { scope, .. }
            | Self::Similar { scope, .. }
            | Self::Cluster { scope, .. }
            | Self::Suggest { scope }
            | Self::Scatter { scope, .. }
            | Self::Export { scope, .. } => scope,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = AppConfig::load();

    // Resolve CSV path: CLI > config > ./songs.csv
    let csv_path = config.resolve_csv(cli.csv.clone());
    log::info!("CSV: {}", csv_path.display());

    let scope = cli.command.scope();
    if let Some(seed) = scope.seed {
        config.analytics.seed = Some(seed);
    }

    let store = trackmap::loader::load_csv(&csv_path)
        .with_context(|| format!("Failed to load {}", csv_path.display()))?;

    let mut session = Session::new(&config);
    session.load(store, Instant::now());
    apply_scope(&mut session, scope)?;

    match cli.command {
        Commands::View {
            search,
            sort,
            desc,
            limit,
            ..
        } => {
            if let Some(search) = search {
                session.set_search(&search);
            }
            if sort.is_some() || desc {
                session.set_sort(SortKey {
                    column: sort.unwrap_or_else(|| SortKey::default().column),
                    direction: if desc { SortDirection::Desc } else { SortDirection::Asc },
                });
            }
            session.refresh_view();

            let rows: Vec<&TrackRow> = session
                .view()
                .iter()
                .take(limit)
                .filter_map(|&i| session.store().get(i))
                .collect();
            print_track_table(&rows);
            println!();
            println!(
                "Showing {} of {} matching tracks ({} loaded)",
                rows.len(),
                session.view().len(),
                session.store().len()
            );
        }

        Commands::Similar { track, k, .. } => {
            if let Some(k) = k {
                session.set_knn_k(k)?;
            }
            let target = resolve_track(&session, &track)?;
            let neighbors = session
                .find_neighbors(target, &Default::default())
                .context("Similarity search failed")?;

            let Some(target_row) = session.store().get(target) else {
                anyhow::bail!("Row {} does not exist", target);
            };
            println!("Tracks similar to: {}", target_row.label());
            println!(
                "Dimensions: {}",
                dimension_names(session.dimensions())
            );
            println!();

            if neighbors.is_empty() {
                println!("No comparable tracks pass the current filters.");
            } else {
                println!("{:>5} {:>8}  {:<40} {}", "Row", "Dist", "Track", "Artist");
                println!("{}", "-".repeat(80));
                for n in &neighbors {
                    if let Some(row) = session.store().get(n.index) {
                        println!(
                            "{:>5} {:>8.4}  {:<40} {}",
                            n.index,
                            n.distance,
                            truncate(row.title.as_deref().unwrap_or("(untitled)"), 40),
                            row.display_artist()
                        );
                    }
                }
            }
        }

        Commands::Cluster { k, members, .. } => {
            resolve_cluster_target(&mut session, k)?;
            let run = session.run_clustering().context("Clustering failed")?;
            if !run.converged {
                log::warn!("K-means stopped after {} iterations without converging", run.iterations);
            }

            let clusters = session.clusters();
            println!("{}", clusters.summary());
            println!("Dimensions: {}", field_names(&clusters.dimensions));
            if !clusters.skipped_rows.is_empty() {
                log::info!("Rows skipped for missing data: {:?}", clusters.skipped_rows);
            }
            println!();
            print_cluster_legend(&session);

            if members {
                for cluster in 0..session.clusters().actual_k {
                    println!();
                    println!("Cluster {}:", cluster + 1);
                    let rows: Vec<&TrackRow> = session
                        .view()
                        .iter()
                        .filter_map(|&i| session.store().get(i))
                        .filter(|r| r.cluster == Some(cluster))
                        .collect();
                    print_track_table(&rows);
                }
            }
        }

        Commands::Suggest { .. } => match session.update_suggestion() {
            SuggestionStatus::Ready(s) => {
                println!("Suggested cluster count: {}", s.k);
                println!("Sampled {} tracks ({:?})", s.sample_size, s.method);
                println!();
                println!("{:>3} {:>12}", "k", "Inertia");
                println!("{}", "-".repeat(16));
                for (i, inertia) in s.inertias.iter().enumerate() {
                    let marker = if i + 1 == s.k { " <" } else { "" };
                    println!("{:>3} {:>12.3}{}", i + 1, inertia, marker);
                }
            }
            SuggestionStatus::Unavailable(reason) => println!("No suggestion: {}", reason),
            SuggestionStatus::Pending => println!("No suggestion yet."),
        },

        Commands::Scatter {
            x,
            y,
            width,
            cluster,
            json,
            ..
        } => {
            let (default_x, default_y) = session.scatter_axes();
            session.set_scatter_axes(
                x.map(FieldArg::field).unwrap_or(default_x),
                y.map(FieldArg::field).unwrap_or(default_y),
            );
            if let Some(width) = width {
                session.set_canvas_width(width);
            }
            if cluster {
                resolve_cluster_target(&mut session, None)?;
                session.run_clustering().context("Clustering failed")?;
            }

            let projection = session.projection();
            if json {
                println!("{}", serde_json::to_string_pretty(projection)?);
            } else {
                println!("Canvas: {0}x{0} px (padding {1})", projection.size, projection.padding);
                for axis in [&projection.x_axis, &projection.y_axis] {
                    let ticks: Vec<String> = axis.ticks.iter().map(|t| format!("{}", t)).collect();
                    println!("{:<10} step {:<6} ticks {}", axis.field.column(), axis.step, ticks.join(" "));
                }
                println!();
                println!("{:>5} {:>8} {:>8}  {:<8} {}", "Row", "X", "Y", "Colour", "Sel");
                println!("{}", "-".repeat(40));
                for p in &projection.points {
                    println!(
                        "{:>5} {:>8.1} {:>8.1}  {:<8} {}",
                        p.row,
                        p.x,
                        p.y,
                        p.color.unwrap_or("-"),
                        if p.selected { "*" } else { "" }
                    );
                }
            }
        }

        Commands::Export {
            name,
            clusters,
            k,
            rows,
            search,
            ..
        } => {
            let plan = if clusters {
                resolve_cluster_target(&mut session, k)?;
                session.run_clustering().context("Clustering failed")?;
                session.cluster_plan(&name)?
            } else {
                for row in rows {
                    session.toggle_selection(row)?;
                }
                if let Some(search) = search {
                    session.set_search(&search);
                    session.refresh_view();
                    session.select_all_visible();
                }
                session.selection_plan(&name)?
            };
            if plan.missing_uris > 0 {
                log::warn!("{} tracks have no Spotify URI and were left out", plan.missing_uris);
            }
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}

/// Apply filters and dimensions from the command line, then settle the view.
fn apply_scope(session: &mut Session, scope: &Scope) -> Result<()> {
    let now = Instant::now();
    for filter in &scope.filters {
        if let Some(min) = filter.min {
            session.set_filter_min(filter.field, min, now);
        }
        if let Some(max) = filter.max {
            session.set_filter_max(filter.field, max, now);
        }
        let range = session.store().filter(filter.field);
        log::debug!("Filter {}: {}..{}", filter.field, range.min, range.max);
    }

    if !scope.dims.is_empty() {
        let fields: Vec<Field> = scope.dims.iter().map(|d| d.field()).collect();
        let dims = Dimensions::from_fields(&fields).context("No dimensions given")?;
        session.set_dimensions(dims, now);
    }

    session.refresh_view();
    Ok(())
}

/// Explicit `-k` wins; otherwise take the elbow suggestion when there is one.
fn resolve_cluster_target(session: &mut Session, k: Option<usize>) -> Result<()> {
    match k {
        Some(k) => session.set_cluster_target(k)?,
        None => {
            if let SuggestionStatus::Ready(s) = session.update_suggestion() {
                log::info!("Using suggested cluster count {}", s.k);
            }
        }
    }
    Ok(())
}

/// Row index, or the first row (in row order) whose title contains `query`.
fn resolve_track(session: &Session, query: &str) -> Result<usize> {
    if let Ok(index) = query.parse::<usize>() {
        return Ok(index);
    }
    let needle = query.trim().to_lowercase();
    session
        .store()
        .rows()
        .iter()
        .find(|r| {
            r.title
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains(&needle))
        })
        .map(|r| r.index)
        .with_context(|| format!("No track title matches '{}'", query))
}

fn dimension_names(dims: &Dimensions) -> String {
    field_names(&dims.active())
}

fn field_names(fields: &[Field]) -> String {
    fields.iter().map(|f| f.column()).collect::<Vec<_>>().join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "-".to_string())
}

/// Print a table of tracks with their numeric fields.
fn print_track_table(rows: &[&TrackRow]) {
    println!(
        "{:>5}  {:<30} {:<20} {:>4} {:>4} {:>4} {:>4} {:>4} {:>4} {:>3}",
        "Row", "Title", "Artist", "BPM", "Eng", "Dnc", "Val", "Ac", "Pop", "Cl"
    );
    println!("{}", "-".repeat(96));

    for r in rows {
        println!(
            "{:>5}  {:<30} {:<20} {:>4} {:>4} {:>4} {:>4} {:>4} {:>4} {:>3}",
            r.index,
            truncate(r.title.as_deref().unwrap_or(""), 30),
            truncate(r.display_artist(), 20),
            cell(r.value(Field::Bpm)),
            cell(r.value(Field::Energy)),
            cell(r.value(Field::Dance)),
            cell(r.value(Field::Valence)),
            cell(r.value(Field::Acoustic)),
            cell(r.value(Field::Popularity)),
            r.cluster.map(|c| format!("#{}", c + 1)).unwrap_or_default(),
        );
    }

    println!();
    println!("Eng=Energy  Dnc=Dance  Val=Valence  Ac=Acoustic  Pop=Popularity  Cl=Cluster");
}

/// Print one line per palette slot: colour, member count and description.
fn print_cluster_legend(session: &Session) {
    let clusters = session.clusters();
    println!("{:<4} {:<8} {:>6}  {}", "#", "Colour", "Tracks", "Description");
    println!("{}", "-".repeat(72));
    for (i, color) in trackmap::CLUSTER_COLORS.iter().enumerate() {
        println!(
            "{:<4} {:<8} {:>6}  {}",
            i + 1,
            color,
            clusters.counts.get(i).copied().unwrap_or(0),
            clusters.descriptions.get(i).map(String::as_str).unwrap_or("")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter("bpm=90:140").unwrap();
        assert_eq!(filter.field, Field::Bpm);
        assert_eq!((filter.min, filter.max), (Some(90.0), Some(140.0)));

        let filter = parse_filter("Energy=:60").unwrap();
        assert_eq!((filter.min, filter.max), (None, Some(60.0)));

        assert!(parse_filter("energy").is_err());
        assert!(parse_filter("energy=60").is_err());
        assert!(parse_filter("loudness=1:2").is_err());
        assert!(parse_filter("energy=a:2").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Épopée électrique", 8), "Épopé...");
    }
}
