//! Point-to-region attribution and per-region counts.
//!
//! Lookups run in parallel over chunks of points; counting happens
//! afterwards on the calling thread in input order, so the result is the
//! same for any number of `rayon` workers.

use std::collections::BTreeMap;

use density_map_geometry::SpatialError;
use density_map_geometry::progress::{NullProgress, ProgressCallback};
use density_map_geometry_models::{PointFeature, Region, RegionSummary};
use geo::Area;
use rayon::prelude::*;

use crate::SpatialIndex;

/// Number of points looked up per parallel task.
const CHUNK_SIZE: usize = 4096;

/// Counts how many points fall in each region.
///
/// Every region appears in the result, with zero if nothing landed in it.
/// The sum of all counts never exceeds `points.len()` and equals it
/// exactly when every point is covered by some region.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if two regions share an identifier
/// or a point has a non-finite coordinate.
pub fn assign<R: Region>(
    points: &[PointFeature],
    regions: &[R],
) -> Result<BTreeMap<R::Id, u64>, SpatialError> {
    assign_with_progress(points, regions, &NullProgress)
}

/// [`assign`], reporting one progress unit per point.
///
/// # Errors
///
/// See [`assign`].
pub fn assign_with_progress<R: Region>(
    points: &[PointFeature],
    regions: &[R],
    progress: &dyn ProgressCallback,
) -> Result<BTreeMap<R::Id, u64>, SpatialError> {
    let mut counts = BTreeMap::new();
    for region in regions {
        if counts.insert(region.region_id().clone(), 0u64).is_some() {
            return Err(SpatialError::geometry(
                "assign",
                format!("{:?}", region.region_id()),
                "duplicate region identifier",
            ));
        }
    }

    check_finite(points, "assign")?;

    let index = SpatialIndex::build(regions);

    progress.set_total(points.len() as u64);
    progress.set_message("Attributing points".to_string());

    let hits: Vec<Vec<Option<&R::Id>>> = points
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let ids = chunk
                .iter()
                .map(|p| index.lookup(&p.location).map(Region::region_id))
                .collect();
            progress.inc(chunk.len() as u64);
            ids
        })
        .collect();

    let mut assigned = 0u64;
    for id in hits.into_iter().flatten().flatten() {
        if let Some(count) = counts.get_mut(id) {
            *count += 1;
            assigned += 1;
        }
    }

    let outside = points.len() as u64 - assigned;
    progress.finish(format!("Attributed {assigned} points"));
    log::info!(
        "Assigned {assigned} of {} points to {} regions ({outside} outside every region)",
        points.len(),
        regions.len()
    );

    Ok(counts)
}

/// Indices of the points no region covers.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if a point has a non-finite
/// coordinate.
pub fn unassigned<R: Region>(
    points: &[PointFeature],
    regions: &[R],
) -> Result<Vec<usize>, SpatialError> {
    check_finite(points, "unassigned")?;

    let index = SpatialIndex::build(regions);
    Ok(points
        .par_iter()
        .enumerate()
        .filter(|(_, p)| index.lookup(&p.location).is_none())
        .map(|(i, _)| i)
        .collect())
}

/// Joins counts back onto their regions with area-normalized rates.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize<R: Region>(
    regions: &[R],
    counts: &BTreeMap<R::Id, u64>,
) -> Vec<RegionSummary<R::Id>> {
    regions
        .iter()
        .map(|region| {
            let count = counts.get(region.region_id()).copied().unwrap_or(0);
            let area = region.geometry().unsigned_area();
            RegionSummary {
                region_id: region.region_id().clone(),
                name: region.label().map(str::to_string),
                count,
                area,
                count_per_area: (area > 0.0).then(|| count as f64 / area),
            }
        })
        .collect()
}

fn check_finite(points: &[PointFeature], operation: &'static str) -> Result<(), SpatialError> {
    if let Some((i, p)) = points
        .iter()
        .enumerate()
        .find(|(_, p)| !p.x().is_finite() || !p.y().is_finite())
    {
        return Err(SpatialError::geometry(
            operation,
            format!("point #{i}"),
            format!("non-finite coordinate ({}, {})", p.x(), p.y()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use density_map_geometry_models::PolygonRegion;
    use geo::polygon;

    fn rect_region(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> PolygonRegion {
        PolygonRegion::from_polygon(
            id,
            polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)],
        )
        .with_name(id.to_uppercase())
    }

    fn quadrants() -> Vec<PolygonRegion> {
        vec![
            rect_region("sw", 0.0, 0.0, 0.5, 0.5),
            rect_region("se", 0.5, 0.0, 1.0, 0.5),
            rect_region("nw", 0.0, 0.5, 0.5, 1.0),
            rect_region("ne", 0.5, 0.5, 1.0, 1.0),
        ]
    }

    /// Deterministic pseudo-random points in `[-0.25, 1.25)^2`.
    fn scattered(n: usize) -> Vec<PointFeature> {
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            #[allow(clippy::cast_precision_loss)]
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            unit.mul_add(1.5, -0.25)
        };
        (0..n).map(|_| PointFeature::new(next(), next())).collect()
    }

    #[test]
    fn every_region_is_reported() {
        let counts = assign(&[PointFeature::new(0.1, 0.1)], &quadrants()).unwrap();
        assert_eq!(counts.len(), 4);
        assert_eq!(counts["sw"], 1);
        assert_eq!(counts["ne"], 0);
    }

    #[test]
    fn counts_never_exceed_points() {
        let points = scattered(5_000);
        let regions = quadrants();
        let counts = assign(&points, &regions).unwrap();
        let total: u64 = counts.values().sum();
        let outside = unassigned(&points, &regions).unwrap();

        assert!(total <= points.len() as u64);
        assert!(!outside.is_empty());
        assert_eq!(total + outside.len() as u64, points.len() as u64);
    }

    #[test]
    fn full_coverage_counts_every_point() {
        let points: Vec<_> = scattered(2_000)
            .into_iter()
            .filter(|p| (0.0..=1.0).contains(&p.x()) && (0.0..=1.0).contains(&p.y()))
            .collect();
        let counts = assign(&points, &quadrants()).unwrap();
        assert_eq!(counts.values().sum::<u64>(), points.len() as u64);
    }

    #[test]
    fn shared_edge_point_is_counted_once() {
        let regions = vec![
            rect_region("left", 0.0, 0.0, 0.5, 1.0),
            rect_region("right", 0.5, 0.0, 1.0, 1.0),
        ];
        let counts = assign(&[PointFeature::new(0.5, 0.5)], &regions).unwrap();
        assert_eq!(counts["left"] + counts["right"], 1);
        assert_eq!(counts["left"], 1);
    }

    #[test]
    fn four_way_corner_point_is_counted_once() {
        let counts = assign(&[PointFeature::new(0.5, 0.5)], &quadrants()).unwrap();
        assert_eq!(counts.values().sum::<u64>(), 1);
        assert_eq!(counts["sw"], 1);
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let points = scattered(20_000);
        let regions = quadrants();
        let run = |threads| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| assign(&points, &regions).unwrap())
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let regions = vec![
            rect_region("a", 0.0, 0.0, 1.0, 1.0),
            rect_region("a", 1.0, 0.0, 2.0, 1.0),
        ];
        let err = assign(&[], &regions).unwrap_err();
        assert!(matches!(err, SpatialError::Geometry { operation: "assign", .. }));
    }

    #[test]
    fn non_finite_point_is_rejected() {
        let err = assign(&[PointFeature::new(f64::NAN, 0.0)], &quadrants()).unwrap_err();
        assert!(err.to_string().contains("point #0"), "{err}");
    }

    #[test]
    fn summary_normalizes_by_area() {
        let regions = quadrants();
        let points = vec![PointFeature::new(0.1, 0.1), PointFeature::new(0.2, 0.2)];
        let counts = assign(&points, &regions).unwrap();
        let summary = summarize(&regions, &counts);

        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].region_id, "sw");
        assert_eq!(summary[0].name.as_deref(), Some("SW"));
        assert_eq!(summary[0].count, 2);
        assert!((summary[0].area - 0.25).abs() < 1e-12);
        assert!((summary[0].count_per_area.unwrap() - 8.0).abs() < 1e-9);
        assert_eq!(summary[1].count_per_area, Some(0.0));
    }
}
