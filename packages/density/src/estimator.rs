//! Raster evaluation of the kernel density surface.

use std::sync::Arc;

use density_map_geometry::SpatialError;
use density_map_geometry::progress::{ProgressCallback, null_progress};
use density_map_geometry::validate::require_polygonal;
use density_map_geometry_models::{DensitySurface, Kernel, PointFeature};
use geo::{Coord, Intersects, MultiPolygon, Point, Rect};
use rayon::prelude::*;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

use crate::bandwidth::BandwidthRule;
use crate::kernel;

const OPERATION: &str = "estimate";

/// Treatment of kernel mass that falls outside the observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EdgeCorrection {
    /// Mass outside the window is lost, so densities near the edge are
    /// biased low.
    #[default]
    None,
    /// Each point is weighted by the inverse of its kernel mass captured
    /// by inside-window cells, so the surface integrates to the point
    /// count.
    Reweight,
}

impl EdgeCorrection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reweight => "reweight",
        }
    }
}

/// Point with its contribution weight for the R-tree.
#[derive(Clone, Copy, Debug, PartialEq)]
struct IndexedPoint {
    coords: [f64; 2],
    weight: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coords)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.coords[0] - point[0];
        let dy = self.coords[1] - point[1];
        dx.mul_add(dx, dy * dy)
    }

    fn contains_point(&self, point: &[f64; 2]) -> bool {
        self.coords == *point
    }
}

/// Raster layout shared by the evaluation and edge-correction passes.
struct Lattice {
    bounds: Rect<f64>,
    cols: usize,
    rows: usize,
    cell_width: f64,
    cell_height: f64,
}

impl Lattice {
    #[allow(clippy::cast_precision_loss)]
    fn new(bounds: Rect<f64>, resolution: usize) -> Self {
        Self {
            bounds,
            cols: resolution,
            rows: resolution,
            cell_width: bounds.width() / resolution as f64,
            cell_height: bounds.height() / resolution as f64,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn center(&self, row: usize, col: usize) -> [f64; 2] {
        [
            (col as f64 + 0.5).mul_add(self.cell_width, self.bounds.min().x),
            (row as f64 + 0.5).mul_add(-self.cell_height, self.bounds.max().y),
        ]
    }

    /// Inclusive row and column ranges whose centres may lie within
    /// `radius` of `coords`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn window_around(&self, coords: [f64; 2], radius: f64) -> (usize, usize, usize, usize) {
        let min = self.bounds.min();
        let max = self.bounds.max();
        let index = |offset: f64, size: f64, limit: usize| {
            ((offset / size).floor().max(0.0) as usize).min(limit - 1)
        };
        let col_lo = index(coords[0] - radius - min.x, self.cell_width, self.cols);
        let col_hi = index(coords[0] + radius - min.x, self.cell_width, self.cols);
        let row_lo = index(max.y - (coords[1] + radius), self.cell_height, self.rows);
        let row_hi = index(max.y - (coords[1] - radius), self.cell_height, self.rows);
        (row_lo, row_hi, col_lo, col_hi)
    }
}

/// Configurable kernel density estimator.
///
/// ```ignore
/// let surface = DensityEstimator::new(256)
///     .kernel(Kernel::Quartic)
///     .bandwidth(BandwidthRule::Fixed(5_000.0))
///     .estimate(&points, &window)?;
/// ```
#[derive(Clone)]
pub struct DensityEstimator {
    resolution: usize,
    kernel: Kernel,
    bandwidth: BandwidthRule,
    edge_correction: EdgeCorrection,
    progress: Arc<dyn ProgressCallback>,
}

impl DensityEstimator {
    /// Estimator producing a `resolution x resolution` raster with the
    /// Gaussian kernel and Silverman bandwidth.
    #[must_use]
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            kernel: Kernel::default(),
            bandwidth: BandwidthRule::default(),
            edge_correction: EdgeCorrection::default(),
            progress: null_progress(),
        }
    }

    #[must_use]
    pub const fn kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    #[must_use]
    pub const fn bandwidth(mut self, rule: BandwidthRule) -> Self {
        self.bandwidth = rule;
        self
    }

    #[must_use]
    pub const fn edge_correction(mut self, correction: EdgeCorrection) -> Self {
        self.edge_correction = correction;
        self
    }

    /// Reports one unit per evaluated raster row.
    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn resolution(&self) -> usize {
        self.resolution
    }

    #[must_use]
    pub const fn kernel_kind(&self) -> Kernel {
        self.kernel
    }

    #[must_use]
    pub const fn bandwidth_rule(&self) -> BandwidthRule {
        self.bandwidth
    }

    #[must_use]
    pub const fn edge_correction_mode(&self) -> EdgeCorrection {
        self.edge_correction
    }

    /// Evaluates the density of `points` on a raster over the bounding
    /// rectangle of `window`.
    ///
    /// Points outside `window` (closed-set) are ignored. Cells whose centre
    /// lies outside the window are masked with value 0.
    ///
    /// # Errors
    ///
    /// * [`SpatialError::InsufficientData`] if fewer than 2 points are
    ///   given, whatever the other parameters, or fewer than 2 lie in the
    ///   window
    /// * [`SpatialError::Geometry`] if the window is empty, degenerate or
    ///   invalid, the resolution is 0, or the bandwidth is invalid
    pub fn estimate(
        &self,
        points: &[PointFeature],
        window: &MultiPolygon<f64>,
    ) -> Result<DensitySurface, SpatialError> {
        require_points(points.len())?;

        let bounds = require_polygonal(window, OPERATION, "window")?;

        if self.resolution == 0 {
            return Err(SpatialError::geometry(
                OPERATION,
                "resolution",
                "raster resolution must be positive",
            ));
        }
        self.bandwidth.validate(OPERATION)?;

        let inside_points: Vec<PointFeature> = points
            .iter()
            .filter(|p| p.x().is_finite() && p.y().is_finite() && window.intersects(&p.location))
            .cloned()
            .collect();

        require_points(inside_points.len())?;

        let excluded = points.len() - inside_points.len();
        if excluded > 0 {
            log::info!("Excluded {excluded} points outside the observation window");
        }

        let h = self.bandwidth.resolve(&inside_points, &bounds, OPERATION)?;
        let radius = kernel::support_radius(self.kernel, h);
        let lattice = Lattice::new(bounds, self.resolution);

        log::info!(
            "Estimating {} density of {} points: bandwidth {h:.3} ({}), {}x{} raster, edge correction {}",
            self.kernel,
            inside_points.len(),
            self.bandwidth,
            lattice.cols,
            lattice.rows,
            self.edge_correction.as_str(),
        );

        let inside = inside_mask(&lattice, window);

        let weights = match self.edge_correction {
            EdgeCorrection::None => vec![1.0; inside_points.len()],
            EdgeCorrection::Reweight => {
                reweight(&inside_points, &lattice, &inside, self.kernel, h, radius)
            }
        };

        let tree = RTree::bulk_load(
            inside_points
                .iter()
                .zip(&weights)
                .map(|(p, &weight)| IndexedPoint {
                    coords: [p.x(), p.y()],
                    weight,
                })
                .collect(),
        );

        self.progress.set_total(lattice.rows as u64);
        self.progress
            .set_message(format!("Evaluating {} density", self.kernel));

        let max_d2 = radius * radius;
        let rows: Vec<Vec<f64>> = (0..lattice.rows)
            .into_par_iter()
            .map(|row| {
                let values = (0..lattice.cols)
                    .map(|col| {
                        if !inside[row * lattice.cols + col] {
                            return 0.0;
                        }
                        let center = lattice.center(row, col);
                        tree.locate_within_distance(center, max_d2)
                            .map(|p| {
                                p.weight * kernel::evaluate(self.kernel, p.distance_2(&center), h)
                            })
                            .sum::<f64>()
                    })
                    .collect();
                self.progress.inc(1);
                values
            })
            .collect();

        let surface = DensitySurface {
            bounds,
            cols: lattice.cols,
            rows: lattice.rows,
            values: rows.into_iter().flatten().collect(),
            inside,
            bandwidth: h,
            kernel: self.kernel,
            point_count: inside_points.len(),
        };

        self.progress.finish(format!(
            "Density surface complete (mass {:.2})",
            surface.total_mass()
        ));
        log::debug!(
            "Surface max {:.6}, mass {:.4} for {} points",
            surface.max_value(),
            surface.total_mass(),
            surface.point_count
        );

        Ok(surface)
    }
}

const fn require_points(found: usize) -> Result<(), SpatialError> {
    if found < 2 {
        return Err(SpatialError::InsufficientData {
            operation: OPERATION,
            required: 2,
            found,
        });
    }
    Ok(())
}

fn inside_mask(lattice: &Lattice, window: &MultiPolygon<f64>) -> Vec<bool> {
    (0..lattice.rows)
        .into_par_iter()
        .flat_map_iter(|row| {
            (0..lattice.cols).map(move |col| {
                let [x, y] = lattice.center(row, col);
                window.intersects(&Point(Coord { x, y }))
            })
        })
        .collect()
}

/// Inverse of each point's kernel mass over inside-window cell centres.
///
/// Points whose kernel reaches no inside centre keep weight 1; they
/// contribute nothing either way.
fn reweight(
    points: &[PointFeature],
    lattice: &Lattice,
    inside: &[bool],
    kernel_kind: Kernel,
    h: f64,
    radius: f64,
) -> Vec<f64> {
    let cell_area = lattice.cell_width * lattice.cell_height;
    let max_d2 = radius * radius;

    points
        .par_iter()
        .map(|p| {
            let coords = [p.x(), p.y()];
            let (row_lo, row_hi, col_lo, col_hi) = lattice.window_around(coords, radius);
            let mut mass = 0.0;
            for row in row_lo..=row_hi {
                for col in col_lo..=col_hi {
                    if !inside[row * lattice.cols + col] {
                        continue;
                    }
                    let [cx, cy] = lattice.center(row, col);
                    let dx = coords[0] - cx;
                    let dy = coords[1] - cy;
                    let d2 = dx.mul_add(dx, dy * dy);
                    if d2 <= max_d2 {
                        mass += kernel::evaluate(kernel_kind, d2, h);
                    }
                }
            }
            mass *= cell_area;
            if mass > 0.0 { mass.recip() } else { 1.0 }
        })
        .collect()
}
