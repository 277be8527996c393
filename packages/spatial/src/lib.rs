#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! In-memory spatial index for point attribution.
//!
//! Builds an R-tree over region envelopes and answers point-in-polygon
//! lookups with a bounding-box pre-filter followed by an exact test.
//! [`binning`] uses it to turn a point layer into per-region counts for
//! county choropleths and grid cell counts.

pub mod binning;

pub use binning::{assign, assign_with_progress, summarize, unassigned};

use density_map_geometry_models::Region;
use geo::{Point, Rect};
use rstar::{AABB, RTree, RTreeObject};

/// A region stored in the R-tree along with its enumeration order.
struct RegionEntry<'a, R> {
    order: usize,
    envelope: AABB<[f64; 2]>,
    region: &'a R,
}

impl<R> RTreeObject for RegionEntry<'_, R> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over a borrowed slice of regions.
///
/// Regions with empty geometry (e.g. grid cells clipped away entirely) are
/// not indexed and never match.
pub struct SpatialIndex<'a, R: Region> {
    tree: RTree<RegionEntry<'a, R>>,
}

impl<'a, R: Region> SpatialIndex<'a, R> {
    /// Bulk-loads the R-tree from `regions`.
    #[must_use]
    pub fn build(regions: &'a [R]) -> Self {
        let entries: Vec<_> = regions
            .iter()
            .enumerate()
            .filter_map(|(order, region)| {
                let envelope = compute_envelope(region.extent()?);
                Some(RegionEntry {
                    order,
                    envelope,
                    region,
                })
            })
            .collect();

        log::debug!(
            "Indexed {} of {} regions ({} empty)",
            entries.len(),
            regions.len(),
            regions.len() - entries.len()
        );

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed (non-empty) regions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Finds the region a point is attributed to.
    ///
    /// Containment is closed: a point on a region's boundary is inside it.
    /// When several regions cover the point (shared edges, overlaps) the one
    /// earliest in the input slice wins, so every covered point lands in
    /// exactly one region.
    #[must_use]
    pub fn lookup(&self, point: &Point<f64>) -> Option<&'a R> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        self.tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.region.covers(point))
            .min_by_key(|entry| entry.order)
            .map(|entry| entry.region)
    }

    /// Returns every region covering a point, in input order.
    #[must_use]
    pub fn lookup_all(&self, point: &Point<f64>) -> Vec<&'a R> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        let mut hits: Vec<_> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.region.covers(point))
            .collect();
        hits.sort_by_key(|entry| entry.order);
        hits.into_iter().map(|entry| entry.region).collect()
    }
}

fn compute_envelope(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}
