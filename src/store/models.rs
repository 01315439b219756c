use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Everything that isn't part of a number gets stripped before parsing ("128 BPM" -> 128).
static NON_NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.\-]").unwrap());

/// The six numeric audio features every track row may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "BPM", alias = "bpm")]
    Bpm,
    #[serde(alias = "energy")]
    Energy,
    #[serde(alias = "dance")]
    Dance,
    #[serde(alias = "valence")]
    Valence,
    #[serde(alias = "acoustic")]
    Acoustic,
    #[serde(alias = "popularity")]
    Popularity,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Bpm,
        Field::Energy,
        Field::Dance,
        Field::Valence,
        Field::Acoustic,
        Field::Popularity,
    ];

    /// Column name as it appears in the (header-normalized) CSV.
    pub fn column(self) -> &'static str {
        match self {
            Self::Bpm => "BPM",
            Self::Energy => "Energy",
            Self::Dance => "Dance",
            Self::Valence => "Valence",
            Self::Acoustic => "Acoustic",
            Self::Popularity => "Popularity",
        }
    }

    /// Lowercase label used in cluster descriptions.
    pub fn label(self) -> String {
        self.column().replace('_', " ").to_lowercase()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.column().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown field '{}' (expected one of BPM, Energy, Dance, Valence, Acoustic, Popularity)",
                    s
                )
            })
    }
}

/// Parse a numeric cell leniently. Missing, empty, or unparseable cells are `None`, never zero.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC_RE.replace_all(raw, "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A loaded track. `index` is assigned once at load and never changes.
#[derive(Debug, Clone)]
pub struct TrackRow {
    pub index: usize,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub release: Option<String>,
    pub spotify_artists: Option<String>,
    pub spotify_track_id: Option<String>,
    pub spotify_uri: Option<String>,
    pub spotify_url: Option<String>,

    /// All columns keyed by normalized header, used for sorting.
    pub columns: BTreeMap<String, String>,
    pub values: [Option<f64>; 6],
    /// Lowercase concatenation of the text fields, matched by the search box.
    pub search_key: String,
    /// Cluster slot, `None` until clustering runs (or when the row was skipped).
    pub cluster: Option<usize>,
}

impl TrackRow {
    /// Build a row from normalized `column -> cell` pairs.
    pub fn from_columns(index: usize, columns: BTreeMap<String, String>) -> Self {
        let text = |key: &str| {
            columns
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let title = text("Title");
        let artist = text("Artist");
        let release = text("Release");
        let spotify_artists = text("Spotify_Artists");

        let search_key = [&title, &artist, &release, &spotify_artists]
            .iter()
            .filter_map(|v| v.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let mut values = [None; 6];
        for field in Field::ALL {
            values[field.index()] = columns.get(field.column()).and_then(|v| parse_numeric(v));
        }

        Self {
            index,
            spotify_track_id: text("Spotify_Track_ID"),
            spotify_uri: text("Spotify_URI"),
            spotify_url: text("Spotify_URL"),
            title,
            artist,
            release,
            spotify_artists,
            columns,
            values,
            search_key,
            cluster: None,
        }
    }

    pub fn value(&self, field: Field) -> Option<f64> {
        self.values[field.index()]
    }

    /// Raw cell text for a column, empty when the column is missing.
    pub fn column(&self, key: &str) -> &str {
        self.columns.get(key).map(String::as_str).unwrap_or("")
    }

    /// Display artist, falling back to the Spotify artist list.
    pub fn display_artist(&self) -> &str {
        self.artist
            .as_deref()
            .or(self.spotify_artists.as_deref())
            .unwrap_or("Unknown")
    }

    /// Tooltip-style label: "Title • Artist".
    pub fn label(&self) -> String {
        format!(
            "{} • {}",
            self.title.as_deref().unwrap_or(""),
            self.display_artist()
        )
    }

    /// Link to the track, built from the track id when no URL column was present.
    pub fn track_url(&self) -> Option<String> {
        self.spotify_url.clone().or_else(|| {
            self.spotify_track_id
                .as_ref()
                .map(|id| format!("https://open.spotify.com/track/{}", id))
        })
    }
}

/// Slider bounds for one numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterRange {
    pub absolute_min: f64,
    pub absolute_max: f64,
    pub min: f64,
    pub max: f64,
}

impl FilterRange {
    /// Derive bounds from observed values: floor of the min, ceil of the max.
    /// No observed values gives the default 0..100 window.
    pub fn from_values(values: impl Iterator<Item = f64>) -> Self {
        let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let (absolute_min, absolute_max) = if lo.is_finite() && hi.is_finite() {
            (lo.floor(), hi.ceil())
        } else {
            (0.0, 100.0)
        };
        Self {
            absolute_min,
            absolute_max,
            min: absolute_min,
            max: absolute_max,
        }
    }

    /// Absolute span, floored to 1 so it is always safe to divide by.
    pub fn span(&self) -> f64 {
        let span = self.absolute_max - self.absolute_min;
        if span == 0.0 { 1.0 } else { span }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Move the lower bound, never past the upper bound or outside the absolute range.
    pub fn set_min(&mut self, value: f64) {
        self.min = value.min(self.max).max(self.absolute_min);
    }

    /// Move the upper bound, never below the lower bound or outside the absolute range.
    pub fn set_max(&mut self, value: f64) {
        self.max = value.max(self.min).min(self.absolute_max);
    }

    pub fn reset(&mut self) {
        self.min = self.absolute_min;
        self.max = self.absolute_max;
    }

    pub fn is_reset(&self) -> bool {
        self.min == self.absolute_min && self.max == self.absolute_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("128"), Some(128.0));
        assert_eq!(parse_numeric(" 72 BPM"), Some(72.0));
        assert_eq!(parse_numeric("-3.5"), Some(-3.5));
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("n/a"), None);
        // Stripped to "1.2.3", which is not a number
        assert_eq!(parse_numeric("1.2.3"), None);
    }

    #[test]
    fn test_field_from_str() {
        assert_eq!("bpm".parse::<Field>().unwrap(), Field::Bpm);
        assert_eq!("Valence".parse::<Field>().unwrap(), Field::Valence);
        assert!("loudness".parse::<Field>().is_err());
        assert_eq!(Field::Bpm.label(), "bpm");
    }

    #[test]
    fn test_row_from_columns() {
        let row = TrackRow::from_columns(
            3,
            columns(&[
                ("Title", "Scarlet Begonias"),
                ("Artist", "Grateful Dead"),
                ("BPM", "101"),
                ("Energy", ""),
                ("Spotify_Track_ID", "abc123"),
            ]),
        );
        assert_eq!(row.index, 3);
        assert_eq!(row.value(Field::Bpm), Some(101.0));
        assert_eq!(row.value(Field::Energy), None);
        assert_eq!(row.value(Field::Dance), None);
        assert_eq!(row.search_key, "scarlet begonias grateful dead");
        assert_eq!(row.track_url().as_deref(), Some("https://open.spotify.com/track/abc123"));
        assert_eq!(row.cluster, None);
    }

    #[test]
    fn test_filter_range_bounds() {
        let range = FilterRange::from_values([10.4, 3.7, 99.1].into_iter());
        assert_eq!(range.absolute_min, 3.0);
        assert_eq!(range.absolute_max, 100.0);

        let empty = FilterRange::from_values(std::iter::empty());
        assert_eq!((empty.absolute_min, empty.absolute_max), (0.0, 100.0));
    }

    #[test]
    fn test_filter_range_setters_keep_order() {
        let mut range = FilterRange::from_values([0.0, 100.0].into_iter());
        range.set_max(40.0);
        range.set_min(60.0);
        assert_eq!(range.min, 40.0);
        assert_eq!(range.max, 40.0);
        range.set_max(500.0);
        assert_eq!(range.max, 100.0);
        range.set_min(-20.0);
        assert_eq!(range.min, 0.0);
        assert!(range.is_reset());
    }

    #[test]
    fn test_zero_span_floors_to_one() {
        let range = FilterRange::from_values([5.0, 5.0].into_iter());
        assert_eq!(range.span(), 1.0);
    }
}
