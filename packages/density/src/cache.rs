//! In-memory memoization of density surfaces.
//!
//! A surface is a pure function of the point coordinates, the window, and
//! the estimator settings. [`DensityCache`] keys surfaces by a SHA-256
//! fingerprint of those inputs so repeated requests (re-rendering with a
//! different palette, exporting twice) skip the raster evaluation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use density_map_geometry::SpatialError;
use density_map_geometry_models::{DensitySurface, PointFeature};
use geo::{LineString, MultiPolygon};
use sha2::{Digest, Sha256};

use crate::estimator::DensityEstimator;

/// Thread-safe map from input fingerprint to computed surface.
#[derive(Default)]
pub struct DensityCache {
    entries: Mutex<BTreeMap<String, Arc<DensitySurface>>>,
}

impl DensityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached surface for these inputs, estimating and storing
    /// it on a miss.
    ///
    /// Failed estimates are not cached.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`DensityEstimator::estimate`].
    pub fn get_or_estimate(
        &self,
        estimator: &DensityEstimator,
        points: &[PointFeature],
        window: &MultiPolygon<f64>,
    ) -> Result<Arc<DensitySurface>, SpatialError> {
        let key = fingerprint(estimator, points, window);

        if let Some(surface) = self.lock().get(&key) {
            log::debug!("Density cache hit {}", &key[..12]);
            return Ok(Arc::clone(surface));
        }

        log::debug!("Density cache miss {}", &key[..12]);
        let surface = Arc::new(estimator.estimate(points, window)?);
        self.lock().insert(key, Arc::clone(&surface));
        Ok(surface)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<DensitySurface>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hex SHA-256 over everything that determines a surface.
///
/// Coordinates are hashed by bit pattern, so `0.0` and `-0.0` produce
/// different keys.
#[must_use]
pub fn fingerprint(
    estimator: &DensityEstimator,
    points: &[PointFeature],
    window: &MultiPolygon<f64>,
) -> String {
    let mut hasher = Sha256::new();

    hasher.update((estimator.resolution() as u64).to_le_bytes());
    hasher.update(estimator.kernel_kind().as_str().as_bytes());
    hasher.update([0u8]);
    let rule = estimator.bandwidth_rule();
    hasher.update(rule.name().as_bytes());
    hasher.update([0u8]);
    hasher.update(rule.parameter().unwrap_or(0.0).to_bits().to_le_bytes());
    hasher.update(estimator.edge_correction_mode().as_str().as_bytes());
    hasher.update([0u8]);

    hasher.update((points.len() as u64).to_le_bytes());
    for p in points {
        hasher.update(p.x().to_bits().to_le_bytes());
        hasher.update(p.y().to_bits().to_le_bytes());
    }

    hasher.update((window.0.len() as u64).to_le_bytes());
    for polygon in window {
        hash_ring(&mut hasher, polygon.exterior());
        hasher.update((polygon.interiors().len() as u64).to_le_bytes());
        for ring in polygon.interiors() {
            hash_ring(&mut hasher, ring);
        }
    }

    hex::encode(hasher.finalize())
}

fn hash_ring(hasher: &mut Sha256, ring: &LineString<f64>) {
    hasher.update((ring.0.len() as u64).to_le_bytes());
    for c in &ring.0 {
        hasher.update(c.x.to_bits().to_le_bytes());
        hasher.update(c.y.to_bits().to_le_bytes());
    }
}
