pub mod clustering;
pub mod config;
pub mod export;
pub mod loader;
pub mod scatter;
pub mod scheduler;
pub mod session;
pub mod similarity;
pub mod store;
pub mod view;

/// Cluster palette. Its length caps the requested cluster count.
pub const CLUSTER_COLORS: [&str; 6] = [
    "#ef4444", "#f97316", "#facc15", "#10b981", "#3b82f6", "#8b5cf6",
];

/// Largest cluster count on offer (one per palette colour).
pub const CLUSTER_COUNT: usize = CLUSTER_COLORS.len();

/// Application name for XDG paths
pub const APP_NAME: &str = "trackmap";
