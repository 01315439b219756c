//! Playlist export plans: which track URIs go into which playlist.
//!
//! Nothing here talks to a streaming service. The plans are handed (usually as
//! JSON) to whatever creates the playlists.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::session::ClusterState;
use crate::store::RowStore;
use crate::{CLUSTER_COLORS, CLUSTER_COUNT};

/// Most URIs the playlist API accepts per add-tracks call.
pub const BATCH_SIZE: usize = 100;

pub const DEFAULT_PLAYLIST_NAME: &str = "Trackmap Playlist";

#[derive(Error, Debug, PartialEq)]
pub enum ExportError {
    #[error("No tracks selected.")]
    NothingSelected,
    #[error("Run K-means before creating cluster playlists.")]
    ClustersNotReady,
    #[error("No clustered tracks with Spotify URIs are available.")]
    NoClusteredUris,
}

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistPlan {
    pub name: String,
    pub description: String,
    /// Palette colour when the playlist came from a cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<&'static str>,
    pub uris: Vec<String>,
}

impl PlaylistPlan {
    /// URIs in API-sized chunks.
    pub fn batches(&self) -> impl Iterator<Item = &[String]> {
        self.uris.chunks(BATCH_SIZE)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportPlan {
    pub playlists: Vec<PlaylistPlan>,
    /// Rows that would have been exported but have no URI.
    pub missing_uris: usize,
}

impl ExportPlan {
    pub fn track_count(&self) -> usize {
        self.playlists.iter().map(|p| p.uris.len()).sum()
    }
}

fn base_name(base: &str) -> &str {
    let trimmed = base.trim();
    if trimmed.is_empty() { DEFAULT_PLAYLIST_NAME } else { trimmed }
}

/// One playlist holding the selected rows, in row order.
pub fn selection_plan(store: &RowStore, selected: &BTreeSet<usize>, base: &str) -> Result<ExportPlan> {
    let mut uris = Vec::new();
    let mut missing_uris = 0;
    for row in selected.iter().filter_map(|&i| store.get(i)) {
        match &row.spotify_uri {
            Some(uri) => uris.push(uri.clone()),
            None => missing_uris += 1,
        }
    }

    if uris.is_empty() {
        return Err(ExportError::NothingSelected);
    }

    Ok(ExportPlan {
        playlists: vec![PlaylistPlan {
            name: base_name(base).to_string(),
            description: "Created by trackmap".to_string(),
            color: None,
            uris,
        }],
        missing_uris,
    })
}

/// One playlist per palette slot ("{base} #1" ...), described by the cluster's
/// generated description.
pub fn cluster_plan(store: &RowStore, clusters: &ClusterState, base: &str) -> Result<ExportPlan> {
    if !clusters.ready {
        return Err(ExportError::ClustersNotReady);
    }

    let mut groups: Vec<Vec<String>> = vec![Vec::new(); CLUSTER_COUNT];
    let mut missing_uris = 0;
    for row in store.rows() {
        let Some(cluster) = row.cluster.filter(|&c| c < CLUSTER_COUNT) else {
            continue;
        };
        match &row.spotify_uri {
            Some(uri) => groups[cluster].push(uri.clone()),
            None => missing_uris += 1,
        }
    }

    if groups.iter().all(Vec::is_empty) {
        return Err(ExportError::NoClusteredUris);
    }

    let base = base_name(base);
    let playlists = groups
        .into_iter()
        .enumerate()
        .map(|(i, uris)| {
            let description = clusters
                .descriptions
                .get(i)
                .map(|d| d.trim())
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Cluster {}", i + 1));
            PlaylistPlan {
                name: format!("{} #{}", base, i + 1),
                description,
                color: Some(CLUSTER_COLORS[i]),
                uris,
            }
        })
        .collect();

    Ok(ExportPlan {
        playlists,
        missing_uris,
    })
}
