#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point feature, polygon region, grid cell and density surface types.
//!
//! These are the plain values handed between the pipeline stages
//! (geometry store, binner, grid generator and density estimator). All
//! coordinates are planar `f64` values in whatever projected CRS the
//! geometry store was reprojected into.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Free-form feature attributes (e.g. `"category" -> "Campground"`).
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// A single located observation such as a campground or a church.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointFeature {
    /// Planar location.
    pub location: Point<f64>,
    /// Attributes carried over from the source layer.
    #[serde(default)]
    pub attributes: Attributes,
}

impl PointFeature {
    /// Creates a feature with no attributes.
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            location: Point::new(x, y),
            attributes: Attributes::new(),
        }
    }

    /// Replaces the attribute map.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn x(&self) -> f64 {
        self.location.x()
    }

    #[must_use]
    pub fn y(&self) -> f64 {
        self.location.y()
    }

    /// Returns an attribute value by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Returns an attribute rendered as text. Numbers and booleans are
    /// stringified so that filters like `STATEFP=13` match either form.
    #[must_use]
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        attribute_text(&self.attributes, name)
    }
}

/// An administrative or arbitrary bounded area used for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolygonRegion {
    /// Stable identifier (e.g. county GEOID `"13121"`).
    pub id: String,
    /// Human-readable name (e.g. `"Fulton"`).
    pub name: Option<String>,
    /// Boundary; may be multi-part with holes.
    pub geometry: MultiPolygon<f64>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl PolygonRegion {
    #[must_use]
    pub fn new(id: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id: id.into(),
            name: None,
            geometry,
            attributes: Attributes::new(),
        }
    }

    /// Convenience constructor for a single-part region.
    #[must_use]
    pub fn from_polygon(id: impl Into<String>, polygon: Polygon<f64>) -> Self {
        Self::new(id, MultiPolygon(vec![polygon]))
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        attribute_text(&self.attributes, name)
    }
}

/// One rectangular cell of a regular lattice.
///
/// Before clipping `geometry` is exactly `rect`. After clipping it is the
/// intersection of `rect` with the boundary, which may be empty.
///
/// Overlay output is snapped, so a partially clipped cell's geometry can
/// sit a hair inside the true boundary. Such cells keep the boundaries
/// they were clipped to in `clip_masks`, and point containment is decided
/// against `rect` and those masks rather than the snapped polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    /// 1-based sequential identifier in row-major order.
    pub id: u32,
    /// Row index, 0 at the northern edge.
    pub row: u32,
    /// Column index, 0 at the western edge.
    pub col: u32,
    /// The unclipped lattice rectangle.
    pub rect: Rect<f64>,
    pub geometry: MultiPolygon<f64>,
    /// Boundaries this cell was partially clipped to.
    #[serde(skip)]
    pub clip_masks: Vec<Arc<MultiPolygon<f64>>>,
}

impl GridCell {
    /// Returns `true` if clipping removed the whole cell.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }
}

/// Anything the binner can count points into.
///
/// Implemented by [`PolygonRegion`] (keyed by its string id) and
/// [`GridCell`] (keyed by its numeric id).
pub trait Region: Sync {
    /// Identifier type used as the aggregate count key.
    type Id: Ord + Clone + Send + Sync + fmt::Debug;

    fn region_id(&self) -> &Self::Id;

    fn geometry(&self) -> &MultiPolygon<f64>;

    /// Bounding box used to prefilter lookups. `None` for regions that
    /// can never contain a point.
    fn extent(&self) -> Option<Rect<f64>> {
        self.geometry().bounding_rect()
    }

    /// Closed-set containment: boundary points are covered.
    fn covers(&self, point: &Point<f64>) -> bool {
        self.geometry().intersects(point)
    }

    /// Display label for summaries.
    fn label(&self) -> Option<&str> {
        None
    }
}

impl Region for PolygonRegion {
    type Id = String;

    fn region_id(&self) -> &String {
        &self.id
    }

    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    fn label(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Region for GridCell {
    type Id = u32;

    fn region_id(&self) -> &u32 {
        &self.id
    }

    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    fn extent(&self) -> Option<Rect<f64>> {
        if self.is_empty() {
            None
        } else if self.clip_masks.is_empty() {
            self.geometry.bounding_rect()
        } else {
            Some(self.rect)
        }
    }

    fn covers(&self, point: &Point<f64>) -> bool {
        if self.clip_masks.is_empty() {
            return self.geometry.intersects(point);
        }
        !self.is_empty()
            && self.rect.intersects(point)
            && self.clip_masks.iter().all(|mask| mask.intersects(point))
    }
}

/// Count and area statistics for one region, ready for a choropleth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSummary<Id> {
    pub region_id: Id,
    pub name: Option<String>,
    /// Number of points attributed to this region.
    pub count: u64,
    /// Planar area in squared CRS units.
    pub area: f64,
    /// Points per unit area, `None` when the region has no area.
    pub count_per_area: Option<f64>,
}

/// Smoothing kernel used by the density estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    #[default]
    Gaussian,
    Quartic,
    Epanechnikov,
}

impl Kernel {
    pub const ALL: &[Self] = &[Self::Gaussian, Self::Quartic, Self::Epanechnikov];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Quartic => "quartic",
            Self::Epanechnikov => "epanechnikov",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kernel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| format!("unknown kernel '{s}' (expected gaussian, quartic or epanechnikov)"))
    }
}

/// A raster of density values over a window's bounding rectangle.
///
/// Values are stored row-major with row 0 at the northern edge. Each value
/// approximates points per unit area, so `sum(values) * cell_area()`
/// approximates the number of contributing points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensitySurface {
    /// Bounding rectangle of the observation window.
    pub bounds: Rect<f64>,
    pub cols: usize,
    pub rows: usize,
    pub values: Vec<f64>,
    /// Whether each cell centre lies inside the window. Masked cells hold 0.
    pub inside: Vec<bool>,
    /// Kernel bandwidth actually used.
    pub bandwidth: f64,
    pub kernel: Kernel,
    /// Number of in-window points that contributed.
    pub point_count: usize,
}

impl DensitySurface {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_width(&self) -> f64 {
        self.bounds.width() / self.cols as f64
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_height(&self) -> f64 {
        self.bounds.height() / self.rows as f64
    }

    #[must_use]
    pub fn cell_area(&self) -> f64 {
        self.cell_width() * self.cell_height()
    }

    #[must_use]
    pub const fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// Rectangle covered by the cell at `(row, col)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let w = self.cell_width();
        let h = self.cell_height();
        let min_x = self.bounds.min().x + col as f64 * w;
        let max_y = self.bounds.max().y - row as f64 * h;
        Rect::new(
            Coord { x: min_x, y: max_y - h },
            Coord { x: min_x + w, y: max_y },
        )
    }

    /// Centre of the cell at `(row, col)`.
    #[must_use]
    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        self.cell_rect(row, col).center()
    }

    /// Sum of all values times the cell area.
    #[must_use]
    pub fn total_mass(&self) -> f64 {
        self.values.iter().sum::<f64>() * self.cell_area()
    }

    #[must_use]
    pub fn max_value(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Value of the cell containing `(x, y)`, or `None` outside the raster.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn value_at(&self, x: f64, y: f64) -> Option<f64> {
        let min = self.bounds.min();
        let max = self.bounds.max();
        if x < min.x || x > max.x || y < min.y || y > max.y {
            return None;
        }
        let col = (((x - min.x) / self.cell_width()) as usize).min(self.cols - 1);
        let row = (((max.y - y) / self.cell_height()) as usize).min(self.rows - 1);
        self.values.get(self.index(row, col)).copied()
    }

    /// Returns a copy scaled so the maximum value is 1 (for gradient fills).
    /// An all-zero surface is returned unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let max = self.max_value();
        let mut out = self.clone();
        if max > 0.0 {
            for v in &mut out.values {
                *v /= max;
            }
        }
        out
    }
}

/// One raster cell as a polygon tagged with its density value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DensityCell {
    pub row: usize,
    pub col: usize,
    pub polygon: Polygon<f64>,
    pub value: f64,
    pub inside: bool,
}

fn attribute_text(attributes: &Attributes, name: &str) -> Option<String> {
    match attributes.get(name)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> DensitySurface {
        DensitySurface {
            bounds: Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 4.0, y: 2.0 }),
            cols: 4,
            rows: 2,
            values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            inside: vec![true; 8],
            bandwidth: 1.0,
            kernel: Kernel::Gaussian,
            point_count: 2,
        }
    }

    #[test]
    fn cell_geometry_is_north_up() {
        let s = surface();
        let rect = s.cell_rect(0, 0);
        assert!((rect.min().y - 1.0).abs() < f64::EPSILON);
        assert!((rect.max().y - 2.0).abs() < f64::EPSILON);
        let c = s.cell_center(1, 3);
        assert!((c.x - 3.5).abs() < f64::EPSILON);
        assert!((c.y - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn value_lookup_matches_cell_layout() {
        let s = surface();
        assert_eq!(s.value_at(0.5, 1.5), Some(0.0));
        assert_eq!(s.value_at(3.5, 0.5), Some(7.0));
        assert_eq!(s.value_at(4.0, 0.0), Some(7.0));
        assert_eq!(s.value_at(5.0, 0.5), None);
    }

    #[test]
    fn total_mass_and_normalization() {
        let s = surface();
        assert!((s.total_mass() - 28.0).abs() < 1e-12);
        let n = s.normalized();
        assert!((n.max_value() - 1.0).abs() < f64::EPSILON);
        assert!((n.values[1] - 1.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn kernel_parses_case_insensitively() {
        assert_eq!("Gaussian".parse::<Kernel>(), Ok(Kernel::Gaussian));
        assert_eq!(" quartic ".parse::<Kernel>(), Ok(Kernel::Quartic));
        assert!("triangular".parse::<Kernel>().is_err());
        for k in Kernel::ALL {
            assert_eq!(k.to_string().parse::<Kernel>(), Ok(*k));
        }
    }

    #[test]
    fn attribute_text_stringifies_numbers() {
        let mut attrs = Attributes::new();
        attrs.insert("STATEFP".to_string(), serde_json::json!(13));
        attrs.insert("NAME".to_string(), serde_json::json!("Fulton"));
        attrs.insert("EMPTY".to_string(), serde_json::Value::Null);
        let region = PolygonRegion::new("13121", MultiPolygon(vec![])).with_attributes(attrs);
        assert_eq!(region.attribute_text("STATEFP").as_deref(), Some("13"));
        assert_eq!(region.attribute_text("NAME").as_deref(), Some("Fulton"));
        assert_eq!(region.attribute_text("EMPTY"), None);
        assert_eq!(region.attribute_text("MISSING"), None);
    }
}
