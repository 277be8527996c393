//! In-memory store of point features and polygon regions.
//!
//! A [`GeometryStore`] pairs a set of features with the CRS they are
//! expressed in. Every operation returns a new store, so a pipeline reads
//! as a chain of pure steps: load, filter, reproject, then hand the
//! geometries to the binner, grid generator or density estimator.

use geo::{BooleanOps, BoundingRect, Coord, MapCoords, MultiPolygon, Rect};

use density_map_geometry_models::{PointFeature, PolygonRegion};

use crate::SpatialError;
use crate::crs::{CoordTransform, Crs, CrsRegistry};
use crate::validate::require_polygonal;

/// Point features and polygon regions in a single coordinate reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryStore {
    crs: Option<Crs>,
    points: Vec<PointFeature>,
    regions: Vec<PolygonRegion>,
}

impl GeometryStore {
    #[must_use]
    pub const fn new(
        crs: Option<Crs>,
        points: Vec<PointFeature>,
        regions: Vec<PolygonRegion>,
    ) -> Self {
        Self {
            crs,
            points,
            regions,
        }
    }

    #[must_use]
    pub const fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    #[must_use]
    pub fn points(&self) -> &[PointFeature] {
        &self.points
    }

    #[must_use]
    pub fn regions(&self) -> &[PolygonRegion] {
        &self.regions
    }

    /// Consumes the store, returning its points and regions.
    #[must_use]
    pub fn into_parts(self) -> (Vec<PointFeature>, Vec<PolygonRegion>) {
        (self.points, self.regions)
    }

    /// Transforms every coordinate into `target`.
    ///
    /// `source` overrides the store's own CRS, which is how callers supply
    /// a reference for data that arrived without one.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Crs`] if no source CRS is known, if the
    /// registry cannot resolve either reference, or if any coordinate lies
    /// outside the domain of the transform.
    pub fn reproject(
        &self,
        target: &Crs,
        source: Option<&Crs>,
        registry: &dyn CrsRegistry,
    ) -> Result<Self, SpatialError> {
        let Some(source) = source.or(self.crs.as_ref()) else {
            return Err(SpatialError::crs(
                "reproject",
                format!("store has no CRS and none was supplied (target {target})"),
            ));
        };

        let transform = registry.transform(source, target)?;
        let transform: &dyn CoordTransform = transform.as_ref();

        let points = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let coord = transform.apply(p.location.0).ok_or_else(|| {
                    SpatialError::crs(
                        "reproject",
                        format!(
                            "point #{i} ({}, {}) is outside the domain of {source} -> {target}",
                            p.x(),
                            p.y()
                        ),
                    )
                })?;
                Ok(PointFeature {
                    location: coord.into(),
                    attributes: p.attributes.clone(),
                })
            })
            .collect::<Result<Vec<_>, SpatialError>>()?;

        let regions = self
            .regions
            .iter()
            .map(|r| {
                let id = r.id.as_str();
                let geometry = r.geometry.try_map_coords(|c: Coord<f64>| {
                    transform.apply(c).ok_or_else(|| {
                        SpatialError::crs(
                            "reproject",
                            format!(
                                "region {id} has a vertex ({}, {}) outside the domain of {source} -> {target}",
                                c.x, c.y
                            ),
                        )
                    })
                })?;
                Ok(PolygonRegion {
                    geometry,
                    ..r.clone()
                })
            })
            .collect::<Result<Vec<_>, SpatialError>>()?;

        log::debug!(
            "Reprojected {} points and {} regions from {source} to {target}",
            points.len(),
            regions.len()
        );

        Ok(Self {
            crs: Some(target.clone()),
            points,
            regions,
        })
    }

    /// Minimal rectangle enclosing every point and region.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] if the store holds no coordinates.
    pub fn bounds(&self) -> Result<Rect<f64>, SpatialError> {
        let rect = merge_rects(bounds_of_points(&self.points), bounds_of_regions(&self.regions));
        rect.ok_or_else(|| SpatialError::geometry("bounds", "geometry store", "store is empty"))
    }

    /// Keeps only the points matching `keep`.
    #[must_use]
    pub fn filter_points(&self, keep: impl Fn(&PointFeature) -> bool) -> Self {
        Self {
            crs: self.crs.clone(),
            points: self.points.iter().filter(|p| keep(p)).cloned().collect(),
            regions: self.regions.clone(),
        }
    }

    /// Keeps only the regions matching `keep`.
    #[must_use]
    pub fn filter_regions(&self, keep: impl Fn(&PolygonRegion) -> bool) -> Self {
        Self {
            crs: self.crs.clone(),
            points: self.points.clone(),
            regions: self.regions.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Unions every region into a single boundary (e.g. counties into the
    /// state outline used as grid boundary and density window).
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] if the store has no regions or the
    /// union is degenerate.
    pub fn dissolve_regions(&self) -> Result<MultiPolygon<f64>, SpatialError> {
        let mut iter = self.regions.iter();
        let Some(first) = iter.next() else {
            return Err(SpatialError::geometry(
                "dissolve_regions",
                "geometry store",
                "store has no regions",
            ));
        };

        let dissolved = iter.fold(first.geometry.clone(), |acc, r| acc.union(&r.geometry));
        require_polygonal(&dissolved, "dissolve_regions", "dissolved boundary")?;

        log::debug!(
            "Dissolved {} regions into {} part(s)",
            self.regions.len(),
            dissolved.0.len()
        );

        Ok(dissolved)
    }

    /// Checks every region for emptiness, zero area and self-intersection.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Geometry`] for the first invalid region,
    /// identified by its id.
    pub fn validate_regions(&self) -> Result<(), SpatialError> {
        for region in &self.regions {
            require_polygonal(&region.geometry, "validate_regions", &region.id)?;
        }
        Ok(())
    }
}

/// Minimal rectangle enclosing a set of points.
#[must_use]
pub fn bounds_of_points(points: &[PointFeature]) -> Option<Rect<f64>> {
    points
        .iter()
        .map(|p| Rect::new(p.location.0, p.location.0))
        .reduce(union_rect)
}

/// Minimal rectangle enclosing a set of regions. Empty regions are skipped.
#[must_use]
pub fn bounds_of_regions(regions: &[PolygonRegion]) -> Option<Rect<f64>> {
    regions
        .iter()
        .filter_map(|r| r.geometry.bounding_rect())
        .reduce(union_rect)
}

fn merge_rects(a: Option<Rect<f64>>, b: Option<Rect<f64>>) -> Option<Rect<f64>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(union_rect(a, b)),
        (a, b) => a.or(b),
    }
}

fn union_rect(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::BuiltinRegistry;
    use geo::{Area, polygon};

    fn square(id: &str, x0: f64, y0: f64, size: f64) -> PolygonRegion {
        PolygonRegion::from_polygon(
            id,
            polygon![
                (x: x0, y: y0),
                (x: x0 + size, y: y0),
                (x: x0 + size, y: y0 + size),
                (x: x0, y: y0 + size),
            ],
        )
    }

    fn church(x: f64, y: f64) -> PointFeature {
        let mut attrs = density_map_geometry_models::Attributes::new();
        attrs.insert("category".to_string(), serde_json::json!("Church"));
        PointFeature::new(x, y).with_attributes(attrs)
    }

    #[test]
    fn bounds_cover_points_and_regions() {
        let store = GeometryStore::new(
            None,
            vec![PointFeature::new(-1.0, 5.0)],
            vec![square("a", 0.0, 0.0, 2.0)],
        );
        let b = store.bounds().unwrap();
        assert_eq!(b.min(), Coord { x: -1.0, y: 0.0 });
        assert_eq!(b.max(), Coord { x: 2.0, y: 5.0 });
    }

    #[test]
    fn bounds_of_empty_store_is_geometry_error() {
        let err = GeometryStore::default().bounds().unwrap_err();
        assert!(matches!(err, SpatialError::Geometry { operation: "bounds", .. }));
    }

    #[test]
    fn reproject_without_crs_fails() {
        let store = GeometryStore::new(None, vec![PointFeature::new(-84.0, 33.0)], vec![]);
        let err = store
            .reproject(&Crs::epsg(3857), None, &BuiltinRegistry)
            .unwrap_err();
        assert!(matches!(err, SpatialError::Crs { operation: "reproject", .. }));
    }

    #[test]
    fn reproject_with_supplied_source() {
        let store = GeometryStore::new(None, vec![PointFeature::new(0.0, 0.0)], vec![]);
        let out = store
            .reproject(&Crs::epsg(3857), Some(&Crs::wgs84()), &BuiltinRegistry)
            .unwrap();
        assert_eq!(out.crs(), Some(&Crs::epsg(3857)));
        assert!(out.points()[0].x().abs() < 1e-9);
    }

    #[test]
    fn reproject_is_deterministic_and_keeps_attributes() {
        let store = GeometryStore::new(
            Some(Crs::wgs84()),
            vec![church(-84.388, 33.749)],
            vec![square("13121", -84.8, 33.5, 0.5)],
        );
        let target = Crs::parse("ESRI:102003").unwrap();
        let a = store.reproject(&target, None, &BuiltinRegistry).unwrap();
        let b = store.reproject(&target, None, &BuiltinRegistry).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.points()[0].attribute_text("category").as_deref(),
            Some("Church")
        );
        assert_eq!(a.regions()[0].id, "13121");
        assert!(a.regions()[0].geometry.unsigned_area() > 1.0e9);
    }

    #[test]
    fn reproject_out_of_domain_names_the_region() {
        let store = GeometryStore::new(
            Some(Crs::wgs84()),
            vec![],
            vec![square("polar", 0.0, 86.0, 1.0)],
        );
        let err = store
            .reproject(&Crs::epsg(3857), None, &BuiltinRegistry)
            .unwrap_err();
        assert!(err.to_string().contains("polar"), "{err}");
    }

    #[test]
    fn filters_by_attribute() {
        let store = GeometryStore::new(
            None,
            vec![church(0.0, 0.0), PointFeature::new(1.0, 1.0)],
            vec![],
        );
        let churches = store.filter_points(|p| {
            p.attribute_text("category").as_deref() == Some("Church")
        });
        assert_eq!(churches.points().len(), 1);
        assert_eq!(store.points().len(), 2);
    }

    #[test]
    fn dissolves_adjacent_regions() {
        let store = GeometryStore::new(
            None,
            vec![],
            vec![square("a", 0.0, 0.0, 1.0), square("b", 1.0, 0.0, 1.0)],
        );
        let outline = store.dissolve_regions().unwrap();
        assert!((outline.unsigned_area() - 2.0).abs() < 1e-9);
        assert_eq!(outline.0.len(), 1);
    }

    #[test]
    fn validate_reports_offending_region() {
        let flat = PolygonRegion::from_polygon(
            "flat",
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)],
        );
        let store = GeometryStore::new(None, vec![], vec![square("ok", 0.0, 0.0, 1.0), flat]);
        let err = store.validate_regions().unwrap_err();
        match err {
            SpatialError::Geometry { input, .. } => assert_eq!(input, "flat"),
            other => panic!("unexpected error {other}"),
        }
    }
}
