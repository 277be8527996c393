use std::path::PathBuf;

use density_map_geometry::SpatialError;
use thiserror::Error;

/// Errors surfaced by the command-line harness.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(Box<geojson::Error>),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),

    /// An input file parsed but its content is unusable.
    #[error("{}: {message}", path.display())]
    Input { path: PathBuf, message: String },
}

impl From<geojson::Error> for CliError {
    fn from(e: geojson::Error) -> Self {
        Self::GeoJson(Box::new(e))
    }
}

impl CliError {
    #[must_use]
    pub fn input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Input {
            path: path.into(),
            message: message.into(),
        }
    }
}
