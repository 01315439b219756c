use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::CLUSTER_COUNT;
use crate::clustering::elbow::{self, ElbowParams};
use crate::scatter;
use crate::similarity::{Dimensions, MAX_KNN_K};
use crate::store::models::Field;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// CSV export to load when `--csv` isn't given.
    pub csv_path: Option<PathBuf>,
    pub analytics: AnalyticsConfig,
    pub scatter: ScatterConfig,
    pub suggestion: SuggestionConfig,
}

/// Neighbour search and clustering defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Neighbours added by "find similar" (1..=50).
    pub knn_k: usize,
    /// Requested cluster count (1..=palette size).
    pub cluster_count: usize,
    /// Fields enabled for similarity and clustering.
    pub dimensions: Dimensions,
    /// Fixed RNG seed for reproducible clustering. Unset = fresh entropy each run.
    pub seed: Option<u64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            knn_k: 5,
            cluster_count: CLUSTER_COUNT,
            dimensions: Dimensions::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    pub x: Field,
    pub y: Field,
    /// Container width in pixels; the canvas is square and capped.
    pub canvas_size: f64,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            x: Field::Valence,
            y: Field::Energy,
            canvas_size: scatter::DEFAULT_CANVAS,
        }
    }
}

/// Elbow-sweep tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub sample_cap: usize,
    pub max_iterations: usize,
    /// Quiet period after the last filter/dimension change before re-running.
    pub debounce_ms: u64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            sample_cap: elbow::DEFAULT_SAMPLE_CAP,
            max_iterations: elbow::DEFAULT_MAX_ITERATIONS,
            debounce_ms: 250,
        }
    }
}

impl SuggestionConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn elbow_params(&self) -> ElbowParams {
        ElbowParams {
            max_k: CLUSTER_COUNT,
            sample_cap: self.sample_cap.max(1),
            max_iterations: self.max_iterations.max(1),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/trackmap/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse TOML text, then pull out-of-range numbers back into bounds.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: AppConfig = toml::from_str(contents)?;
        config.clamp();
        Ok(config)
    }

    fn clamp(&mut self) {
        let a = &mut self.analytics;
        if !(1..=MAX_KNN_K).contains(&a.knn_k) {
            log::warn!("knn_k {} out of range, clamping to 1..={}", a.knn_k, MAX_KNN_K);
            a.knn_k = a.knn_k.clamp(1, MAX_KNN_K);
        }
        if !(1..=CLUSTER_COUNT).contains(&a.cluster_count) {
            log::warn!(
                "cluster_count {} out of range, clamping to 1..={}",
                a.cluster_count,
                CLUSTER_COUNT
            );
            a.cluster_count = a.cluster_count.clamp(1, CLUSTER_COUNT);
        }
    }

    /// Resolve the CSV to load: CLI > config > `songs.csv` in the working directory.
    pub fn resolve_csv(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.csv_path.clone())
            .unwrap_or_else(|| PathBuf::from("songs.csv"))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.analytics.knn_k, 5);
        assert_eq!(config.analytics.cluster_count, CLUSTER_COUNT);
        assert_eq!(
            config.analytics.dimensions.active(),
            vec![Field::Bpm, Field::Energy, Field::Dance, Field::Valence]
        );
        assert_eq!(config.scatter.x, Field::Valence);
        assert_eq!(config.scatter.y, Field::Energy);
        assert_eq!(config.suggestion.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_overrides() {
        let config = AppConfig::parse(
            r#"
            csv_path = "/music/export.csv"

            [analytics]
            knn_k = 12
            cluster_count = 4
            dimensions = ["Energy", "Acoustic"]
            seed = 42

            [scatter]
            x = "BPM"
            y = "Popularity"
            "#,
        )
        .unwrap();
        assert_eq!(config.csv_path, Some(PathBuf::from("/music/export.csv")));
        assert_eq!(config.analytics.knn_k, 12);
        assert_eq!(config.analytics.cluster_count, 4);
        assert_eq!(config.analytics.dimensions.active(), vec![Field::Energy, Field::Acoustic]);
        assert_eq!(config.analytics.seed, Some(42));
        assert_eq!(config.scatter.x, Field::Bpm);
        assert_eq!(config.scatter.y, Field::Popularity);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = AppConfig::parse("[analytics]\nknn_k = 500\ncluster_count = 0\n").unwrap();
        assert_eq!(config.analytics.knn_k, MAX_KNN_K);
        assert_eq!(config.analytics.cluster_count, 1);
    }

    #[test]
    fn test_empty_dimensions_rejected() {
        assert!(AppConfig::parse("[analytics]\ndimensions = []\n").is_err());
    }

    #[test]
    fn test_resolve_csv() {
        let config = AppConfig::default();
        assert_eq!(config.resolve_csv(None), PathBuf::from("songs.csv"));
        assert_eq!(
            config.resolve_csv(Some(PathBuf::from("x.csv"))),
            PathBuf::from("x.csv")
        );
    }
}
