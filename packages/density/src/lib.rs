#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Window-constrained kernel density estimation.
//!
//! Turns a point layer into a continuous density surface over an
//! observation window (for example a state outline), then into
//! rectangular polygons carrying a density value for choropleth-style
//! rendering. Values approximate points per unit area, so the surface
//! integrates to roughly the number of contributing points.

pub mod bandwidth;
pub mod cache;
pub mod estimator;
pub mod kernel;

pub use bandwidth::BandwidthRule;
pub use cache::DensityCache;
pub use estimator::{DensityEstimator, EdgeCorrection};

use density_map_geometry::SpatialError;
use density_map_geometry_models::{DensityCell, DensitySurface, PointFeature};
use geo::MultiPolygon;

/// Estimates a Gaussian density surface with `resolution x resolution`
/// cells.
///
/// `bandwidth` fixes the kernel bandwidth in CRS units; `None` selects it
/// with Silverman's rule.
///
/// # Errors
///
/// See [`DensityEstimator::estimate`].
pub fn estimate(
    points: &[PointFeature],
    window: &MultiPolygon<f64>,
    resolution: usize,
    bandwidth: Option<f64>,
) -> Result<DensitySurface, SpatialError> {
    DensityEstimator::new(resolution)
        .bandwidth(bandwidth.map_or(BandwidthRule::Silverman, BandwidthRule::Fixed))
        .estimate(points, window)
}

/// Every raster cell as a rectangle tagged with its value, row-major from
/// the north-west corner. Masked cells carry 0 and `inside == false`.
#[must_use]
pub fn to_polygons(surface: &DensitySurface) -> Vec<DensityCell> {
    (0..surface.rows)
        .flat_map(|row| (0..surface.cols).map(move |col| (row, col)))
        .map(|(row, col)| {
            let i = surface.index(row, col);
            DensityCell {
                row,
                col,
                polygon: surface.cell_rect(row, col).to_polygon(),
                value: surface.values[i],
                inside: surface.inside[i],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, polygon};

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    #[test]
    fn one_point_in_unit_square_is_insufficient() {
        let err = estimate(&[PointFeature::new(0.5, 0.5)], &unit_square(), 16, None).unwrap_err();
        assert!(matches!(err, SpatialError::InsufficientData { .. }), "{err}");
    }

    #[test]
    fn explicit_bandwidth_is_used() {
        let points = vec![PointFeature::new(0.3, 0.3), PointFeature::new(0.7, 0.6)];
        let surface = estimate(&points, &unit_square(), 16, Some(0.25)).unwrap();
        assert!((surface.bandwidth - 0.25).abs() < f64::EPSILON);
        assert_eq!(surface.values.len(), 256);
    }

    #[test]
    fn polygon_mass_matches_point_count_with_default_bandwidth() {
        let window = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ]]);
        let points: Vec<PointFeature> = (0..=10)
            .flat_map(|i| {
                (0..=10).map(move |j| {
                    PointFeature::new(
                        2.0f64.mul_add(f64::from(i), 40.0),
                        3.0f64.mul_add(f64::from(j), 35.0),
                    )
                })
            })
            .collect();

        let surface = estimate(&points, &window, 200, None).unwrap();
        assert!(surface.bandwidth > 1.0, "bandwidth {}", surface.bandwidth);

        let mass: f64 = to_polygons(&surface)
            .iter()
            .map(|c| c.value * c.polygon.unsigned_area())
            .sum();
        assert!(
            (mass - 121.0).abs() / 121.0 < 0.01,
            "mass {mass} for 121 points"
        );
    }

    #[test]
    fn polygons_cover_the_raster() {
        let points = vec![PointFeature::new(0.3, 0.3), PointFeature::new(0.7, 0.6)];
        let surface = estimate(&points, &unit_square(), 8, Some(0.2)).unwrap();
        let cells = to_polygons(&surface);

        assert_eq!(cells.len(), 64);
        let area: f64 = cells.iter().map(|c| c.polygon.unsigned_area()).sum();
        assert!((area - 1.0).abs() < 1e-12);

        let cell = &cells[9];
        assert_eq!((cell.row, cell.col), (1, 1));
        assert!((cell.value - surface.values[9]).abs() < f64::EPSILON);
        assert!(cells.iter().all(|c| c.inside));
    }
}
