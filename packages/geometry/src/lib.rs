#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry store and coordinate reference handling.
//!
//! Holds point features and polygon regions in a single planar projection,
//! reprojects them through a [`crs::CrsRegistry`], and defines the error
//! taxonomy shared by every pipeline stage (binning, gridding and density
//! estimation). The CRS is always an explicit argument; nothing in this
//! crate keeps a process-wide "active" projection.

pub mod crs;
pub mod progress;
pub mod store;
pub mod validate;

pub use density_map_geometry_models as models;

use thiserror::Error;

/// Errors that can occur in any stage of the density map pipeline.
///
/// Every variant names the operation that failed so a caller can report
/// the failing stage without re-running it.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// Unknown, missing or incompatible coordinate reference.
    #[error("CRS error in {operation}: {message}")]
    Crs {
        /// Operation that failed (e.g. `"reproject"`).
        operation: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// Degenerate, empty or self-intersecting input geometry, or an
    /// invalid geometric parameter such as a zero grid dimension.
    #[error("Geometry error in {operation} ({input}): {message}")]
    Geometry {
        /// Operation that failed (e.g. `"make_grid"`).
        operation: &'static str,
        /// Identifier of the offending input.
        input: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Too few points for a statistical operation.
    #[error("Insufficient data for {operation}: need at least {required} points, found {found}")]
    InsufficientData {
        /// Operation that failed (e.g. `"estimate"`).
        operation: &'static str,
        /// Minimum number of points required.
        required: usize,
        /// Number of usable points found.
        found: usize,
    },
}

impl SpatialError {
    /// Shorthand for a [`SpatialError::Geometry`] error.
    #[must_use]
    pub fn geometry(
        operation: &'static str,
        input: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Geometry {
            operation,
            input: input.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`SpatialError::Crs`] error.
    #[must_use]
    pub fn crs(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Crs {
            operation,
            message: message.into(),
        }
    }

    /// The operation this error was raised from.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Crs { operation, .. }
            | Self::Geometry { operation, .. }
            | Self::InsufficientData { operation, .. } => operation,
        }
    }
}
