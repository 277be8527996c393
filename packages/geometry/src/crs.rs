//! Coordinate reference identifiers and the built-in reprojection registry.
//!
//! A [`Crs`] is just a normalized `AUTHORITY:CODE` identifier. Resolving it
//! to an actual transform is the job of a [`CrsRegistry`]; the
//! [`BuiltinRegistry`] knows the handful of references this pipeline
//! needs for Georgia data:
//!
//! * `EPSG:4326`, `EPSG:4269`, `OGC:CRS84` - geographic lon/lat degrees.
//!   WGS84 and NAD83 are treated as coincident (no datum shift).
//! * `EPSG:3857` - spherical Web Mercator.
//! * `ESRI:102003` - USA Contiguous Albers Equal Area Conic (GRS80).
//! * `EPSG:5070` - CONUS Albers NAD83, same cone with origin at 23°N.
//!
//! Callers needing anything else plug in their own [`CrsRegistry`].

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;

use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::SpatialError;

/// Spherical Web Mercator radius (metres).
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit that makes Web Mercator square.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// GRS80 semi-major axis (metres).
const GRS80_A: f64 = 6_378_137.0;

/// GRS80 inverse flattening.
const GRS80_INV_F: f64 = 298.257_222_101;

/// A coordinate reference identifier such as `EPSG:4326`.
///
/// The authority is upper-cased on parse so `epsg:4326` and `EPSG:4326`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    authority: String,
    code: String,
}

impl Crs {
    /// Parses an `AUTHORITY:CODE` identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Crs`] if `s` is not in `AUTHORITY:CODE` form.
    pub fn parse(s: &str) -> Result<Self, SpatialError> {
        let Some((authority, code)) = s.trim().split_once(':') else {
            return Err(SpatialError::crs(
                "parse_crs",
                format!("'{s}' is not in AUTHORITY:CODE form"),
            ));
        };

        let authority = authority.trim().to_ascii_uppercase();
        let code = code.trim().to_ascii_uppercase();

        if authority.is_empty()
            || code.is_empty()
            || !authority.chars().all(|c| c.is_ascii_alphanumeric())
            || !code.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(SpatialError::crs(
                "parse_crs",
                format!("'{s}' is not in AUTHORITY:CODE form"),
            ));
        }

        Ok(Self { authority, code })
    }

    #[must_use]
    pub fn epsg(code: u32) -> Self {
        Self {
            authority: "EPSG".to_string(),
            code: code.to_string(),
        }
    }

    /// Geographic WGS84 lon/lat (`EPSG:4326`).
    #[must_use]
    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

impl std::str::FromStr for Crs {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = SpatialError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

/// Applies a coordinate transform. Returns `None` for coordinates outside
/// the domain of either projection.
pub trait CoordTransform: Send + Sync {
    fn apply(&self, coord: Coord<f64>) -> Option<Coord<f64>>;
}

/// Resolves CRS identifiers into transforms.
pub trait CrsRegistry: Send + Sync {
    /// Returns a transform from `from` into `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Crs`] if either reference is unknown.
    fn transform(&self, from: &Crs, to: &Crs) -> Result<Box<dyn CoordTransform>, SpatialError>;

    /// Whether coordinates in `crs` are angular rather than planar.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Crs`] if the reference is unknown.
    fn is_geographic(&self, crs: &Crs) -> Result<bool, SpatialError>;
}

/// A map projection between geographic lon/lat degrees and planar
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Identity on lon/lat degrees.
    Geographic,
    /// Spherical Web Mercator.
    WebMercator,
    /// Ellipsoidal Albers equal-area conic.
    AlbersEqualArea(Albers),
}

impl Projection {
    #[must_use]
    pub const fn is_geographic(&self) -> bool {
        matches!(self, Self::Geographic)
    }

    /// Projects lon/lat degrees into this projection.
    #[must_use]
    pub fn forward(&self, lonlat: Coord<f64>) -> Option<Coord<f64>> {
        let Coord { x: lon, y: lat } = lonlat;
        if !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0 {
            return None;
        }

        match self {
            Self::Geographic => Some(lonlat),
            Self::WebMercator => {
                if lat.abs() > WEB_MERCATOR_MAX_LAT {
                    return None;
                }
                Some(Coord {
                    x: WEB_MERCATOR_RADIUS * lon.to_radians(),
                    y: WEB_MERCATOR_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
                })
            }
            Self::AlbersEqualArea(albers) => albers.forward(lon, lat),
        }
    }

    /// Unprojects planar coordinates back to lon/lat degrees.
    #[must_use]
    pub fn inverse(&self, xy: Coord<f64>) -> Option<Coord<f64>> {
        if !xy.x.is_finite() || !xy.y.is_finite() {
            return None;
        }

        match self {
            Self::Geographic => {
                (xy.x.abs() <= 180.0 && xy.y.abs() <= 90.0).then_some(xy)
            }
            Self::WebMercator => Some(Coord {
                x: (xy.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: 2.0f64
                    .mul_add((xy.y / WEB_MERCATOR_RADIUS).exp().atan(), -FRAC_PI_2)
                    .to_degrees(),
            }),
            Self::AlbersEqualArea(albers) => albers.inverse(xy.x, xy.y),
        }
    }
}

/// Precomputed constants for an ellipsoidal Albers equal-area conic.
///
/// Formulas follow Snyder, *Map Projections: A Working Manual* (1987),
/// equations 14-1 through 14-21.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Albers {
    a: f64,
    e: f64,
    e2: f64,
    lon0: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl Albers {
    /// Builds a projection from standard parallels, origin and ellipsoid.
    /// Angles are in degrees.
    #[must_use]
    pub fn new(lat1: f64, lat2: f64, lat0: f64, lon0: f64, a: f64, inv_f: f64) -> Self {
        let f = 1.0 / inv_f;
        let e2 = 2.0f64.mul_add(f, -(f * f));
        let e = e2.sqrt();

        let phi1 = lat1.to_radians();
        let phi2 = lat2.to_radians();
        let phi0 = lat0.to_radians();

        let m1 = m(phi1, e2);
        let m2 = m(phi2, e2);
        let q0 = q(phi0, e, e2);
        let q1 = q(phi1, e, e2);
        let q2 = q(phi2, e, e2);

        let n = if (phi1 - phi2).abs() < 1e-10 {
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = n.mul_add(q1, m1 * m1);
        let rho0 = a * n.mul_add(-q0, c).sqrt() / n;

        Self {
            a,
            e,
            e2,
            lon0: lon0.to_radians(),
            n,
            c,
            rho0,
        }
    }

    /// USA Contiguous Albers Equal Area Conic (`ESRI:102003`).
    #[must_use]
    pub fn usa_contiguous() -> Self {
        Self::new(29.5, 45.5, 37.5, -96.0, GRS80_A, GRS80_INV_F)
    }

    /// CONUS Albers NAD83 (`EPSG:5070`).
    #[must_use]
    pub fn conus_nad83() -> Self {
        Self::new(29.5, 45.5, 23.0, -96.0, GRS80_A, GRS80_INV_F)
    }

    fn forward(&self, lon: f64, lat: f64) -> Option<Coord<f64>> {
        let q = q(lat.to_radians(), self.e, self.e2);
        let radicand = self.n.mul_add(-q, self.c);
        if radicand < 0.0 {
            return None;
        }
        let rho = self.a * radicand.sqrt() / self.n;
        let theta = self.n * wrap_pi(lon.to_radians() - self.lon0);

        Some(Coord {
            x: rho * theta.sin(),
            y: rho.mul_add(-theta.cos(), self.rho0),
        })
    }

    fn inverse(&self, x: f64, y: f64) -> Option<Coord<f64>> {
        let dy = self.rho0 - y;
        let (rho, theta) = if self.n >= 0.0 {
            (x.hypot(dy), x.atan2(dy))
        } else {
            (-x.hypot(dy), (-x).atan2(-dy))
        };

        let q_rho = (self.c - (rho * rho * self.n * self.n) / (self.a * self.a)) / self.n;
        let lon = (self.lon0 + theta / self.n).to_degrees();
        if lon.abs() > 180.0 + 1e-9 {
            return None;
        }

        let q_pole = q(FRAC_PI_2, self.e, self.e2);
        if q_rho.abs() > q_pole + 1e-12 {
            return None;
        }
        if (q_rho.abs() - q_pole).abs() <= 1e-12 {
            return Some(Coord {
                x: lon,
                y: 90.0f64.copysign(q_rho),
            });
        }

        let mut phi = (q_rho / 2.0).clamp(-1.0, 1.0).asin();
        for _ in 0..25 {
            let s = phi.sin();
            let one_minus = self.e2.mul_add(-(s * s), 1.0);
            let delta = one_minus * one_minus / (2.0 * phi.cos())
                * (q_rho / (1.0 - self.e2) - s / one_minus
                    + (1.0 / (2.0 * self.e)) * ((1.0 - self.e * s) / (1.0 + self.e * s)).ln());
            phi += delta;
            if delta.abs() < 1e-12 {
                break;
            }
        }

        Some(Coord {
            x: lon,
            y: phi.to_degrees(),
        })
    }
}

/// Snyder eq. 14-15.
fn m(phi: f64, e2: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / e2.mul_add(-(s * s), 1.0).sqrt()
}

/// Snyder eq. 3-12.
fn q(phi: f64, e: f64, e2: f64) -> f64 {
    let s = phi.sin();
    (1.0 - e2)
        * (s / e2.mul_add(-(s * s), 1.0)
            - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

fn wrap_pi(angle: f64) -> f64 {
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Registry for the references this pipeline works with out of the box.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRegistry;

impl BuiltinRegistry {
    /// Identifiers this registry resolves.
    pub const SUPPORTED: &[&str] = &[
        "EPSG:4326",
        "EPSG:4269",
        "OGC:CRS84",
        "EPSG:3857",
        "EPSG:900913",
        "ESRI:102003",
        "EPSG:5070",
    ];

    /// Resolves a CRS to its projection.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Crs`] for references outside [`Self::SUPPORTED`].
    pub fn projection(&self, crs: &Crs) -> Result<Projection, SpatialError> {
        match (crs.authority(), crs.code()) {
            ("EPSG", "4326" | "4269") | ("OGC", "CRS84") => Ok(Projection::Geographic),
            ("EPSG", "3857" | "900913") => Ok(Projection::WebMercator),
            ("ESRI", "102003") => Ok(Projection::AlbersEqualArea(Albers::usa_contiguous())),
            ("EPSG", "5070") => Ok(Projection::AlbersEqualArea(Albers::conus_nad83())),
            _ => Err(SpatialError::crs(
                "resolve_crs",
                format!(
                    "unknown CRS {crs} (supported: {})",
                    Self::SUPPORTED.join(", ")
                ),
            )),
        }
    }
}

struct ProjectionTransform {
    source: Projection,
    target: Projection,
}

impl CoordTransform for ProjectionTransform {
    fn apply(&self, coord: Coord<f64>) -> Option<Coord<f64>> {
        let lonlat = self.source.inverse(coord)?;
        self.target.forward(lonlat)
    }
}

struct IdentityTransform;

impl CoordTransform for IdentityTransform {
    fn apply(&self, coord: Coord<f64>) -> Option<Coord<f64>> {
        (coord.x.is_finite() && coord.y.is_finite()).then_some(coord)
    }
}

impl CrsRegistry for BuiltinRegistry {
    fn transform(&self, from: &Crs, to: &Crs) -> Result<Box<dyn CoordTransform>, SpatialError> {
        let source = self.projection(from)?;
        let target = self.projection(to)?;

        if source == target {
            return Ok(Box::new(IdentityTransform));
        }

        Ok(Box::new(ProjectionTransform { source, target }))
    }

    fn is_geographic(&self, crs: &Crs) -> Result<bool, SpatialError> {
        Ok(self.projection(crs)?.is_geographic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, LineString, Polygon};

    const ATLANTA: Coord<f64> = Coord {
        x: -84.388,
        y: 33.749,
    };

    #[test]
    fn parses_and_normalizes_identifiers() {
        let crs = Crs::parse(" epsg:4326 ").unwrap();
        assert_eq!(crs, Crs::wgs84());
        assert_eq!(crs.to_string(), "EPSG:4326");
        assert_eq!(Crs::parse("esri:102003").unwrap().authority(), "ESRI");
        assert!(Crs::parse("4326").is_err());
        assert!(Crs::parse("EPSG:").is_err());
        assert!(Crs::parse("EP SG:4326").is_err());
    }

    #[test]
    fn deserializes_from_string() {
        let crs: Crs = serde_json::from_str("\"ESRI:102003\"").unwrap();
        assert_eq!(crs.code(), "102003");
        assert!(serde_json::from_str::<Crs>("\"nonsense\"").is_err());
    }

    #[test]
    fn unknown_crs_is_a_crs_error() {
        let err = BuiltinRegistry
            .transform(&Crs::wgs84(), &Crs::epsg(32617))
            .err()
            .unwrap();
        assert!(matches!(err, SpatialError::Crs { .. }));
        assert!(err.to_string().contains("EPSG:32617"));
    }

    #[test]
    fn every_listed_identifier_resolves() {
        for id in BuiltinRegistry::SUPPORTED {
            let crs = Crs::parse(id).unwrap();
            assert!(BuiltinRegistry.projection(&crs).is_ok(), "{id}");
        }
        assert_eq!(
            BuiltinRegistry.projection(&Crs::epsg(900_913)).unwrap(),
            Projection::WebMercator
        );
    }

    #[test]
    fn web_mercator_known_values() {
        let p = Projection::WebMercator;
        let origin = p.forward(Coord { x: 0.0, y: 0.0 }).unwrap();
        assert!(origin.x.abs() < 1e-9 && origin.y.abs() < 1e-9);
        let edge = p.forward(Coord { x: 180.0, y: 0.0 }).unwrap();
        assert!((edge.x - 20_037_508.342_789_244).abs() < 1e-6);
        let corner = p
            .forward(Coord {
                x: 180.0,
                y: WEB_MERCATOR_MAX_LAT,
            })
            .unwrap();
        assert!((corner.y - corner.x).abs() < 1e-3);
        assert!(p.forward(Coord { x: 0.0, y: 89.0 }).is_none());
    }

    #[test]
    fn web_mercator_roundtrip() {
        let p = Projection::WebMercator;
        let back = p.inverse(p.forward(ATLANTA).unwrap()).unwrap();
        assert!((back.x - ATLANTA.x).abs() < 1e-9);
        assert!((back.y - ATLANTA.y).abs() < 1e-9);
    }

    #[test]
    fn albers_origin_maps_to_zero() {
        let p = Projection::AlbersEqualArea(Albers::usa_contiguous());
        let xy = p.forward(Coord { x: -96.0, y: 37.5 }).unwrap();
        assert!(xy.x.abs() < 1e-6 && xy.y.abs() < 1e-6, "{xy:?}");

        let p = Projection::AlbersEqualArea(Albers::conus_nad83());
        let xy = p.forward(Coord { x: -96.0, y: 23.0 }).unwrap();
        assert!(xy.x.abs() < 1e-6 && xy.y.abs() < 1e-6, "{xy:?}");
    }

    #[test]
    fn albers_roundtrip_over_georgia() {
        let p = Projection::AlbersEqualArea(Albers::usa_contiguous());
        for (lon, lat) in [(-85.6, 30.4), (-80.8, 35.0), (-84.388, 33.749), (-83.0, 32.0)] {
            let xy = p.forward(Coord { x: lon, y: lat }).unwrap();
            let back = p.inverse(xy).unwrap();
            assert!((back.x - lon).abs() < 1e-9, "lon {lon} -> {}", back.x);
            assert!((back.y - lat).abs() < 1e-9, "lat {lat} -> {}", back.y);
        }
    }

    #[test]
    fn albers_east_of_meridian_is_positive_x() {
        let p = Projection::AlbersEqualArea(Albers::usa_contiguous());
        let xy = p.forward(ATLANTA).unwrap();
        assert!(xy.x > 1_000_000.0 && xy.x < 1_200_000.0, "{xy:?}");
        assert!(xy.y < 0.0, "{xy:?}");
    }

    #[test]
    fn albers_preserves_ellipsoidal_area() {
        let albers = Albers::usa_contiguous();
        let p = Projection::AlbersEqualArea(albers);
        let (lon1, lon2, lat1, lat2) = (-85.0, -84.0, 33.0, 34.0);

        let steps = 200;
        let mut ring = Vec::new();
        for i in 0..=steps {
            let lon = lon1 + (lon2 - lon1) * f64::from(i) / f64::from(steps);
            ring.push(p.forward(Coord { x: lon, y: lat1 }).unwrap());
        }
        for i in 0..=steps {
            let lon = lon2 - (lon2 - lon1) * f64::from(i) / f64::from(steps);
            ring.push(p.forward(Coord { x: lon, y: lat2 }).unwrap());
        }
        let projected = Polygon::new(LineString::from(ring), vec![]).unsigned_area();

        let expected = (lon2 - lon1).to_radians() * albers.a * albers.a
            * (q(lat2.to_radians(), albers.e, albers.e2) - q(lat1.to_radians(), albers.e, albers.e2))
            / 2.0;
        assert!(
            ((projected - expected) / expected).abs() < 1e-6,
            "projected {projected} expected {expected}"
        );
    }

    #[test]
    fn registry_transform_chains_projections() {
        let registry = BuiltinRegistry;
        let to_albers = registry
            .transform(&Crs::wgs84(), &Crs::parse("ESRI:102003").unwrap())
            .unwrap();
        let to_mercator = registry
            .transform(&Crs::parse("ESRI:102003").unwrap(), &Crs::epsg(3857))
            .unwrap();

        let albers = to_albers.apply(ATLANTA).unwrap();
        let mercator = to_mercator.apply(albers).unwrap();
        let direct = Projection::WebMercator.forward(ATLANTA).unwrap();
        assert!((mercator.x - direct.x).abs() < 1e-4);
        assert!((mercator.y - direct.y).abs() < 1e-4);
    }

    #[test]
    fn geographic_aliases_are_identity() {
        let t = BuiltinRegistry
            .transform(&Crs::epsg(4269), &Crs::wgs84())
            .unwrap();
        assert_eq!(t.apply(ATLANTA), Some(ATLANTA));
        assert!(BuiltinRegistry.is_geographic(&Crs::epsg(4269)).unwrap());
        assert!(!BuiltinRegistry.is_geographic(&Crs::epsg(3857)).unwrap());
    }
}
