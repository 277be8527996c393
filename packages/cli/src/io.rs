//! GeoJSON ingestion and output.
//!
//! Point layers accept `Point` and `MultiPoint` features; region layers
//! accept `Polygon` and `MultiPolygon`. Feature properties become
//! attributes verbatim so filters can match on any field.

use std::io::Write as _;
use std::path::Path;

use density_map_geometry_models::{
    Attributes, DensityCell, DensitySurface, GridCell, PointFeature, PolygonRegion, RegionSummary,
};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue, feature::Id};
use serde::Serialize;

use crate::error::CliError;

/// Reads a file that must contain a `FeatureCollection`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not GeoJSON, or holds
/// a bare geometry or single feature.
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection, CliError> {
    let text = std::fs::read_to_string(path)?;
    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(_) | GeoJson::Geometry(_) => Err(CliError::input(
            path,
            "expected a FeatureCollection",
        )),
    }
}

/// Loads a point layer.
///
/// Features without geometry are skipped with a warning. A `MultiPoint`
/// yields one point per member, each carrying the feature's attributes.
///
/// # Errors
///
/// Returns an error if the file is unreadable or contains a non-point
/// geometry.
pub fn read_points(path: &Path) -> Result<Vec<PointFeature>, CliError> {
    let fc = read_feature_collection(path)?;
    points_from_features(path, fc.features)
}

/// Loads a region layer.
///
/// The identifier comes from the `id_field` property when given, then
/// the feature id, then the feature's 1-based position.
///
/// # Errors
///
/// Returns an error if the file is unreadable or contains a feature
/// without polygonal geometry.
pub fn read_regions(
    path: &Path,
    id_field: Option<&str>,
    name_field: Option<&str>,
) -> Result<Vec<PolygonRegion>, CliError> {
    let fc = read_feature_collection(path)?;
    regions_from_features(path, fc.features, id_field, name_field)
}

fn points_from_features(path: &Path, features: Vec<Feature>) -> Result<Vec<PointFeature>, CliError> {
    let mut points = Vec::with_capacity(features.len());
    let mut missing = 0usize;

    for (i, feature) in features.into_iter().enumerate() {
        let attributes = attributes_of(feature.properties);
        let Some(geometry) = feature.geometry else {
            missing += 1;
            continue;
        };

        match geo::Geometry::<f64>::try_from(geometry)? {
            geo::Geometry::Point(p) => {
                points.push(PointFeature::new(p.x(), p.y()).with_attributes(attributes));
            }
            geo::Geometry::MultiPoint(mp) => {
                for p in mp {
                    points.push(PointFeature::new(p.x(), p.y()).with_attributes(attributes.clone()));
                }
            }
            other => {
                return Err(CliError::input(
                    path,
                    format!("feature #{i} is a {}, expected a point", geometry_name(&other)),
                ));
            }
        }
    }

    if missing > 0 {
        log::warn!("{}: skipped {missing} features without geometry", path.display());
    }
    log::info!("Loaded {} points from {}", points.len(), path.display());

    Ok(points)
}

fn regions_from_features(
    path: &Path,
    features: Vec<Feature>,
    id_field: Option<&str>,
    name_field: Option<&str>,
) -> Result<Vec<PolygonRegion>, CliError> {
    let mut regions = Vec::with_capacity(features.len());

    for (i, feature) in features.into_iter().enumerate() {
        let attributes = attributes_of(feature.properties);
        let text = |field: Option<&str>| {
            field.and_then(|f| match attributes.get(f)? {
                JsonValue::Null => None,
                JsonValue::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        };

        let id = text(id_field)
            .or_else(|| {
                feature.id.as_ref().map(|id| match id {
                    Id::String(s) => s.clone(),
                    Id::Number(n) => n.to_string(),
                })
            })
            .unwrap_or_else(|| (i + 1).to_string());
        let name = text(name_field);

        let Some(geometry) = feature.geometry else {
            return Err(CliError::input(path, format!("region {id} has no geometry")));
        };

        let multi = match geo::Geometry::<f64>::try_from(geometry)? {
            geo::Geometry::Polygon(p) => geo::MultiPolygon(vec![p]),
            geo::Geometry::MultiPolygon(mp) => mp,
            other => {
                return Err(CliError::input(
                    path,
                    format!("region {id} is a {}, expected a polygon", geometry_name(&other)),
                ));
            }
        };

        let mut region = PolygonRegion::new(id, multi).with_attributes(attributes);
        if let Some(name) = name {
            region = region.with_name(name);
        }
        regions.push(region);
    }

    log::info!("Loaded {} regions from {}", regions.len(), path.display());

    Ok(regions)
}

fn attributes_of(properties: Option<JsonObject>) -> Attributes {
    properties.unwrap_or_default().into_iter().collect()
}

const fn geometry_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Regions with their counts, for a choropleth layer.
#[must_use]
pub fn region_features(
    regions: &[PolygonRegion],
    summaries: &[RegionSummary<String>],
) -> FeatureCollection {
    let features = regions
        .iter()
        .zip(summaries)
        .map(|(region, summary)| {
            let mut properties = JsonObject::new();
            properties.insert("region_id".to_string(), summary.region_id.clone().into());
            if let Some(name) = &summary.name {
                properties.insert("name".to_string(), name.clone().into());
            }
            properties.insert("count".to_string(), summary.count.into());
            properties.insert("count_per_area".to_string(), summary.count_per_area.into());
            feature(Some(geojson::Value::from(&region.geometry)), properties)
        })
        .collect();
    collection(features)
}

/// Grid cells with their counts. Cells clipped away entirely keep their
/// place with a null geometry.
#[must_use]
pub fn grid_features(cells: &[GridCell], summaries: &[RegionSummary<u32>]) -> FeatureCollection {
    let features = cells
        .iter()
        .zip(summaries)
        .map(|(cell, summary)| {
            let mut properties = JsonObject::new();
            properties.insert("cell_id".to_string(), cell.id.into());
            properties.insert("row".to_string(), cell.row.into());
            properties.insert("col".to_string(), cell.col.into());
            properties.insert("count".to_string(), summary.count.into());
            properties.insert("count_per_area".to_string(), summary.count_per_area.into());
            let geometry = (!cell.is_empty()).then(|| geojson::Value::from(&cell.geometry));
            feature(geometry, properties)
        })
        .collect();
    collection(features)
}

/// Density raster cells as rectangles with `value` and `normalized`
/// (value divided by the surface maximum, read from `normalized`).
#[must_use]
pub fn density_features(cells: &[DensityCell], normalized: &DensitySurface) -> FeatureCollection {
    let features = cells
        .iter()
        .map(|cell| {
            let mut properties = JsonObject::new();
            properties.insert("row".to_string(), cell.row.into());
            properties.insert("col".to_string(), cell.col.into());
            properties.insert("value".to_string(), cell.value.into());
            let scaled = normalized.values[normalized.index(cell.row, cell.col)];
            properties.insert("normalized".to_string(), scaled.into());
            properties.insert("inside".to_string(), cell.inside.into());
            feature(Some(geojson::Value::from(&cell.polygon)), properties)
        })
        .collect();
    collection(features)
}

/// Writes pretty-printed JSON to `path`, or to stdout when `None`.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<(), CliError> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            log::info!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn feature(geometry: Option<geojson::Value>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: geometry.map(geojson::Geometry::new),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

const fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn parse_features(json: &str) -> Vec<Feature> {
        match json.parse::<GeoJson>().unwrap() {
            GeoJson::FeatureCollection(fc) => fc.features,
            _ => panic!("not a collection"),
        }
    }

    #[test]
    fn reads_points_and_multipoints() {
        let features = parse_features(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"category":"Church"},
                 "geometry":{"type":"Point","coordinates":[-84.39,33.75]}},
                {"type":"Feature","properties":{"category":"Mosque"},
                 "geometry":{"type":"MultiPoint","coordinates":[[1,2],[3,4]]}},
                {"type":"Feature","properties":{},"geometry":null}
            ]}"#,
        );
        let points = points_from_features(Path::new("p.geojson"), features).unwrap();

        assert_eq!(points.len(), 3);
        assert!((points[0].x() + 84.39).abs() < 1e-12);
        assert_eq!(points[0].attribute_text("category").as_deref(), Some("Church"));
        assert_eq!(points[2].attribute_text("category").as_deref(), Some("Mosque"));
    }

    #[test]
    fn rejects_polygons_in_point_layer() {
        let features = parse_features(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}
            ]}"#,
        );
        let err = points_from_features(Path::new("p.geojson"), features).unwrap_err();
        assert!(err.to_string().contains("expected a point"), "{err}");
    }

    #[test]
    fn region_ids_fall_back_to_feature_id_then_position() {
        let features = parse_features(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"GEOID":"13121","NAME":"Fulton"},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type":"Feature","id":7,"properties":{"NAME":"Cobb"},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type":"Feature","properties":null,
                 "geometry":{"type":"MultiPolygon","coordinates":[[[[0,0],[1,0],[1,1],[0,0]]]]}}
            ]}"#,
        );
        let regions =
            regions_from_features(Path::new("r.geojson"), features, Some("GEOID"), Some("NAME"))
                .unwrap();

        let ids: Vec<_> = regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["13121", "7", "3"]);
        assert_eq!(regions[0].name.as_deref(), Some("Fulton"));
        assert_eq!(regions[2].name, None);
    }

    #[test]
    fn grid_features_keep_empty_cells() {
        let boundary = geo::MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0),
        ]]);
        let cells = density_map_grid::make_clipped_grid(&boundary, 2, 2).unwrap();
        let counts = density_map_spatial::assign(&[PointFeature::new(0.1, 0.1)], &cells).unwrap();
        let summaries = density_map_spatial::summarize(&cells, &counts);
        let fc = grid_features(&cells, &summaries);

        assert_eq!(fc.features.len(), 4);
        assert!(fc.features[1].geometry.is_none());
        let props = fc.features[2].properties.as_ref().unwrap();
        assert_eq!(props["cell_id"], 3);
        assert_eq!(props["count"], 1);
    }
}
