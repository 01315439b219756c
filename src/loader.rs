//! CSV ingestion: reads a track export, normalizes headers, and hands finished
//! rows to the [`RowStore`].

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use csv::ReaderBuilder;
use regex::Regex;
use thiserror::Error;

use crate::store::models::TrackRow;
use crate::store::{RowStore, StoreError};

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no data rows found")]
    NoRows,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LoadError>;

/// "Spotify Track ID" -> "Spotify_Track_ID"
pub fn normalize_header(header: &str) -> String {
    WHITESPACE_RE.replace_all(header.trim(), "_").into_owned()
}

/// Read rows from any CSV source. Row indices follow record order.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<TrackRow>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let columns: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), cell.to_string()))
            .collect();
        rows.push(TrackRow::from_columns(rows.len(), columns));
    }

    if rows.is_empty() {
        return Err(LoadError::NoRows);
    }
    Ok(rows)
}

/// Load a CSV file into a fresh row store.
pub fn load_csv(path: &Path) -> Result<RowStore> {
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let rows = read_rows(file)?;
    log::info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(RowStore::new(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Field;

    const SAMPLE: &str = "\
Title,Artist,Release,BPM,Energy,Dance,Valence,Acoustic,Popularity,Spotify URI
Fire on the Mountain,Grateful Dead,1978,120,65,70,80,10,55,spotify:track:aaa
Dark Star,Grateful Dead,1969,,40,30,45,20,50,spotify:track:bbb

Ripple,Grateful Dead,1970,98 bpm,30,40,70,85,60,
";

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Spotify Track ID"), "Spotify_Track_ID");
        assert_eq!(normalize_header("  BPM "), "BPM");
        assert_eq!(normalize_header("Release\tDate"), "Release_Date");
    }

    #[test]
    fn test_read_rows() {
        let rows = read_rows(SAMPLE.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[2].index, 2);
        assert_eq!(rows[0].spotify_uri.as_deref(), Some("spotify:track:aaa"));
        assert_eq!(rows[1].value(Field::Bpm), None);
        assert_eq!(rows[2].value(Field::Bpm), Some(98.0));
        assert_eq!(rows[2].spotify_uri, None);
        assert_eq!(rows[1].search_key, "dark star grateful dead 1969");
    }

    #[test]
    fn test_header_only_is_error() {
        let result = read_rows("Title,BPM\n".as_bytes());
        assert!(matches!(result, Err(LoadError::NoRows)));
    }
}
