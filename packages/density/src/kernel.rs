//! Radially symmetric 2D smoothing kernels, normalized to unit mass.

use std::f64::consts::PI;

use density_map_geometry_models::Kernel;

/// Multiple of the bandwidth beyond which the Gaussian is truncated.
pub const GAUSSIAN_TRUNCATION: f64 = 4.0;

/// Distance beyond which `kernel` contributes nothing for bandwidth `h`.
#[must_use]
pub fn support_radius(kernel: Kernel, h: f64) -> f64 {
    match kernel {
        Kernel::Gaussian => GAUSSIAN_TRUNCATION * h,
        Kernel::Quartic | Kernel::Epanechnikov => h,
    }
}

/// Kernel value at squared distance `d2` for bandwidth `h`.
///
/// Returns 0 outside the support radius, so a caller that sums only the
/// neighbours within [`support_radius`] gets the same total as one that
/// sums every point.
#[must_use]
pub fn evaluate(kernel: Kernel, d2: f64, h: f64) -> f64 {
    let h2 = h * h;
    match kernel {
        Kernel::Gaussian => {
            let radius = GAUSSIAN_TRUNCATION * h;
            if d2 > radius * radius {
                return 0.0;
            }
            (-d2 / (2.0 * h2)).exp() / (2.0 * PI * h2)
        }
        Kernel::Quartic => {
            if d2 >= h2 {
                return 0.0;
            }
            let t = 1.0 - d2 / h2;
            3.0 / (PI * h2) * t * t
        }
        Kernel::Epanechnikov => {
            if d2 >= h2 {
                return 0.0;
            }
            2.0 / (PI * h2) * (1.0 - d2 / h2)
        }
    }
}
