//! Bandwidth selection.

use std::fmt;

use density_map_geometry::SpatialError;
use density_map_geometry_models::PointFeature;
use geo::Rect;

/// Fraction of the shorter window side used when the spread of the points
/// is zero.
pub const FALLBACK_WINDOW_FRACTION: f64 = 0.125;

/// How the kernel bandwidth is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BandwidthRule {
    /// Silverman's rule of thumb for two dimensions:
    /// `h = sigma * n^(-1/6)` where `sigma` is the root mean of the two
    /// sample variances.
    #[default]
    Silverman,
    /// A fraction of the shorter side of the window's bounding rectangle.
    WindowFraction(f64),
    /// A fixed bandwidth in CRS units.
    Fixed(f64),
}

impl BandwidthRule {
    /// Short name used in logs and cache keys.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Silverman => "silverman",
            Self::WindowFraction(_) => "window_fraction",
            Self::Fixed(_) => "fixed",
        }
    }

    /// Parameter of the rule, if it has one.
    #[must_use]
    pub const fn parameter(self) -> Option<f64> {
        match self {
            Self::Silverman => None,
            Self::WindowFraction(f) | Self::Fixed(f) => Some(f),
        }
    }

    /// Checks the rule's parameter.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] if the parameter is not a
    /// positive finite number.
    pub fn validate(self, operation: &'static str) -> Result<(), SpatialError> {
        match self.parameter() {
            Some(value) if !value.is_finite() || value <= 0.0 => Err(SpatialError::geometry(
                operation,
                "bandwidth",
                format!("{} bandwidth must be positive and finite, got {value}", self.name()),
            )),
            _ => Ok(()),
        }
    }

    /// Resolves the rule to a concrete bandwidth for `points` inside a
    /// window with bounding rectangle `window`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] if the parameter is invalid or
    /// the resolved bandwidth is not positive.
    pub fn resolve(
        self,
        points: &[PointFeature],
        window: &Rect<f64>,
        operation: &'static str,
    ) -> Result<f64, SpatialError> {
        self.validate(operation)?;

        let h = match self {
            Self::Fixed(h) => h,
            Self::WindowFraction(f) => window_fraction(window, f),
            Self::Silverman => match silverman(points) {
                Some(h) if h > 0.0 => h,
                _ => {
                    log::warn!(
                        "Point spread is zero; falling back to 1/8 of the shorter window side"
                    );
                    window_fraction(window, FALLBACK_WINDOW_FRACTION)
                }
            },
        };

        if !h.is_finite() || h <= 0.0 {
            return Err(SpatialError::geometry(
                operation,
                "bandwidth",
                format!("resolved {} bandwidth is not positive: {h}", self.name()),
            ));
        }
        Ok(h)
    }
}

impl fmt::Display for BandwidthRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter() {
            Some(value) => write!(f, "{}({value})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// Silverman's rule of thumb, or `None` with fewer than two points.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn silverman(points: &[PointFeature]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;

    let mean_x = points.iter().map(PointFeature::x).sum::<f64>() / n;
    let mean_y = points.iter().map(PointFeature::y).sum::<f64>() / n;

    let (ss_x, ss_y) = points.iter().fold((0.0, 0.0), |(sx, sy), p| {
        let dx = p.x() - mean_x;
        let dy = p.y() - mean_y;
        (dx.mul_add(dx, sx), dy.mul_add(dy, sy))
    });

    let var_x = ss_x / (n - 1.0);
    let var_y = ss_y / (n - 1.0);
    let sigma = f64::midpoint(var_x, var_y).sqrt();

    Some(sigma * n.powf(-1.0 / 6.0))
}

fn window_fraction(window: &Rect<f64>, fraction: f64) -> f64 {
    window.width().min(window.height()) * fraction
}
