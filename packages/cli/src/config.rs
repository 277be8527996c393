//! Pipeline configuration.
//!
//! Settings come from a TOML file. The Georgia defaults are baked into the
//! binary via [`include_str!`]; `--config` replaces them and individual
//! command-line flags override either.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use density_map_density::{BandwidthRule, EdgeCorrection};
use density_map_geometry::crs::Crs;
use density_map_geometry_models::{Kernel, PointFeature, PolygonRegion};
use serde::Deserialize;

use crate::error::CliError;

const DEFAULT_CONFIG: &str = include_str!("../config/georgia.toml");

/// Complete pipeline settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// CRS of the input files. GeoJSON is lon/lat unless stated otherwise.
    pub source_crs: Option<Crs>,
    /// Planar CRS that binning and density estimation run in.
    pub working_crs: Option<Crs>,
    pub points: PointLayerConfig,
    pub regions: RegionLayerConfig,
    pub grid: GridConfig,
    pub density: DensityConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct PointLayerConfig {
    pub filter: Option<AttributeFilter>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RegionLayerConfig {
    /// Property holding the region identifier. Falls back to the feature
    /// id, then to the feature's position in the file.
    pub id_field: Option<String>,
    pub name_field: Option<String>,
    pub filter: Option<AttributeFilter>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cols: u32,
    pub rows: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cols: 20, rows: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    pub resolution: usize,
    pub kernel: Kernel,
    /// Fixed bandwidth in working CRS units.
    pub bandwidth: Option<f64>,
    /// Bandwidth as a fraction of the shorter window side. Ignored when
    /// `bandwidth` is set.
    pub window_fraction: Option<f64>,
    pub edge_correction: bool,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            kernel: Kernel::default(),
            bandwidth: None,
            window_fraction: None,
            edge_correction: false,
        }
    }
}

impl DensityConfig {
    #[must_use]
    pub fn bandwidth_rule(&self) -> BandwidthRule {
        match (self.bandwidth, self.window_fraction) {
            (Some(h), _) => BandwidthRule::Fixed(h),
            (None, Some(f)) => BandwidthRule::WindowFraction(f),
            (None, None) => BandwidthRule::Silverman,
        }
    }

    #[must_use]
    pub const fn edge_correction_mode(&self) -> EdgeCorrection {
        if self.edge_correction {
            EdgeCorrection::Reweight
        } else {
            EdgeCorrection::None
        }
    }
}

impl PipelineConfig {
    /// The configuration compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Toml`] if the embedded file does not parse.
    pub fn embedded() -> Result<Self, CliError> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Loads `path`, or the embedded defaults when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        match path {
            Some(path) => {
                log::info!("Loading pipeline config from {}", path.display());
                Self::parse(&std::fs::read_to_string(path)?)
            }
            None => Self::embedded(),
        }
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Toml`] on malformed input.
    pub fn parse(toml_str: &str) -> Result<Self, CliError> {
        Ok(toml::de::from_str(toml_str)?)
    }
}

/// `FIELD=VALUE` equality test against a feature attribute.
///
/// Values compare as text, so `STATEFP=13` matches both `"13"` and `13`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AttributeFilter {
    pub field: String,
    pub value: String,
}

impl AttributeFilter {
    #[must_use]
    pub fn matches_point(&self, point: &PointFeature) -> bool {
        point.attribute_text(&self.field).as_deref() == Some(self.value.as_str())
    }

    #[must_use]
    pub fn matches_region(&self, region: &PolygonRegion) -> bool {
        region.attribute_text(&self.field).as_deref() == Some(self.value.as_str())
    }
}

impl FromStr for AttributeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((field, value)) = s.split_once('=') else {
            return Err(format!("expected FIELD=VALUE, got '{s}'"));
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("missing field name in '{s}'"));
        }
        Ok(Self {
            field: field.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl TryFrom<String> for AttributeFilter {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.field, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn embedded_config_parses() {
        let config = PipelineConfig::embedded().unwrap();
        assert_eq!(config.source_crs, Some(Crs::wgs84()));
        assert_eq!(config.working_crs.unwrap().to_string(), "ESRI:102003");
        assert_eq!(config.regions.id_field.as_deref(), Some("GEOID"));
        assert_eq!(
            config.regions.filter,
            Some(AttributeFilter {
                field: "STATEFP".to_string(),
                value: "13".to_string(),
            })
        );
        assert_eq!(config.grid.cols, 40);
        assert_eq!(config.density.kernel, Kernel::Gaussian);
        assert_eq!(config.density.bandwidth_rule(), BandwidthRule::Silverman);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = PipelineConfig::parse("[density]\nbandwidth = 5000.0\n").unwrap();
        assert_eq!(config.source_crs, None);
        assert_eq!(config.grid, GridConfig::default());
        assert_eq!(config.density.resolution, 256);
        assert_eq!(config.density.bandwidth_rule(), BandwidthRule::Fixed(5000.0));
        assert_eq!(config.density.edge_correction_mode(), EdgeCorrection::None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(PipelineConfig::parse("working_crs = \"4326\"").is_err());
        assert!(PipelineConfig::parse("[density]\nkernel = \"box\"").is_err());
        assert!(PipelineConfig::parse("[points]\nfilter = \"category\"").is_err());
    }

    #[test]
    fn filter_matches_text_and_numbers() {
        let filter: AttributeFilter = "STATEFP=13".parse().unwrap();
        let region = |value: serde_json::Value| {
            PolygonRegion::from_polygon(
                "r",
                polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            )
            .with_attributes([("STATEFP".to_string(), value)].into_iter().collect())
        };

        assert!(filter.matches_region(&region(serde_json::json!("13"))));
        assert!(filter.matches_region(&region(serde_json::json!(13))));
        assert!(!filter.matches_region(&region(serde_json::json!("01"))));
        assert!(!filter.matches_point(&PointFeature::new(0.0, 0.0)));
        assert_eq!(filter.to_string(), "STATEFP=13");
    }
}
