//! Boundary validation shared by the grid generator and density estimator.

use geo::{Area, BoundingRect, MultiPolygon, Rect, Validation};

use crate::SpatialError;

/// Checks that `geometry` is usable as a boundary or observation window.
///
/// Rejects empty geometries, zero-area geometries and geometries that fail
/// OGC validity (self-intersecting rings, misplaced holes). Returns the
/// bounding rectangle on success since every caller needs it next.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] naming `operation` and `input`.
pub fn require_polygonal(
    geometry: &MultiPolygon<f64>,
    operation: &'static str,
    input: &str,
) -> Result<Rect<f64>, SpatialError> {
    if geometry.0.is_empty() {
        return Err(SpatialError::geometry(operation, input, "geometry is empty"));
    }

    let Some(rect) = geometry.bounding_rect() else {
        return Err(SpatialError::geometry(
            operation,
            input,
            "geometry has no coordinates",
        ));
    };

    let area = geometry.unsigned_area();
    if !area.is_finite() || area <= 0.0 {
        return Err(SpatialError::geometry(
            operation,
            input,
            format!("geometry is degenerate (area {area})"),
        ));
    }

    if let Err(e) = geometry.check_validation() {
        return Err(SpatialError::geometry(
            operation,
            input,
            format!("geometry is invalid: {e}"),
        ));
    }

    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon, polygon};

    #[test]
    fn accepts_unit_square() {
        let square = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]]);
        let rect = require_polygonal(&square, "test", "square").unwrap();
        assert!((rect.width() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_empty() {
        let err = require_polygonal(&MultiPolygon(vec![]), "make_grid", "boundary").unwrap_err();
        assert!(matches!(
            err,
            SpatialError::Geometry { operation: "make_grid", .. }
        ));
    }

    #[test]
    fn rejects_zero_area() {
        let flat = MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
        ]]);
        let err = require_polygonal(&flat, "clip", "flat").unwrap_err();
        assert!(err.to_string().contains("degenerate"), "{err}");
    }

    #[test]
    fn rejects_bow_tie() {
        let bow_tie = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 4.0), (4.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        )]);
        let err = require_polygonal(&bow_tie, "estimate", "window").unwrap_err();
        assert!(err.to_string().contains("invalid"), "{err}");
    }
}
