#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Regular lattice generation and boundary clipping.
//!
//! [`make_grid`] splits a boundary's bounding rectangle into equal cells
//! numbered `1..=cols*rows` in row-major order from the north-west corner.
//! [`clip`] trims each cell to the boundary. Cells that fall entirely
//! outside keep their identifier with an empty geometry, so cell ids stay
//! stable from generation through binning to rendering.

use std::sync::Arc;

use density_map_geometry::SpatialError;
use density_map_geometry::validate::require_polygonal;
use density_map_geometry_models::GridCell;
use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, MultiPolygon, Rect};
use rayon::prelude::*;

/// Relative area difference below which a clipped cell is considered
/// untouched by the boundary.
const UNCLIPPED_TOLERANCE: f64 = 1e-12;

/// Width and height of one cell for a `n_cols x n_rows` grid over the
/// bounding rectangle of `boundary`.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the boundary is empty, degenerate
/// or invalid, or if either dimension is zero.
pub fn cell_size(
    boundary: &MultiPolygon<f64>,
    n_cols: u32,
    n_rows: u32,
) -> Result<(f64, f64), SpatialError> {
    let rect = require_polygonal(boundary, "cell_size", "boundary")?;
    check_dimensions(n_cols, n_rows, "cell_size")?;
    Ok((
        rect.width() / f64::from(n_cols),
        rect.height() / f64::from(n_rows),
    ))
}

/// Partitions the bounding rectangle of `boundary` into `n_cols x n_rows`
/// equal cells.
///
/// Cells are returned in row-major order starting at the north-west
/// corner with identifiers `1..=n_cols * n_rows`. Adjacent cells share
/// bit-identical edges.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the boundary is empty, degenerate
/// or invalid, if either dimension is zero, or if the cell count does not
/// fit in a `u32`.
pub fn make_grid(
    boundary: &MultiPolygon<f64>,
    n_cols: u32,
    n_rows: u32,
) -> Result<Vec<GridCell>, SpatialError> {
    let rect = require_polygonal(boundary, "make_grid", "boundary")?;
    let total = check_dimensions(n_cols, n_rows, "make_grid")?;

    let width = rect.width() / f64::from(n_cols);
    let height = rect.height() / f64::from(n_rows);

    let x_edge = |col: u32| {
        if col == n_cols {
            rect.max().x
        } else {
            f64::from(col).mul_add(width, rect.min().x)
        }
    };
    let y_edge = |row: u32| {
        if row == n_rows {
            rect.min().y
        } else {
            f64::from(row).mul_add(-height, rect.max().y)
        }
    };

    let mut cells = Vec::with_capacity(total as usize);
    for row in 0..n_rows {
        for col in 0..n_cols {
            let cell_rect = Rect::new(
                Coord {
                    x: x_edge(col),
                    y: y_edge(row + 1),
                },
                Coord {
                    x: x_edge(col + 1),
                    y: y_edge(row),
                },
            );
            cells.push(GridCell {
                id: row * n_cols + col + 1,
                row,
                col,
                rect: cell_rect,
                geometry: MultiPolygon(vec![cell_rect.to_polygon()]),
                clip_masks: vec![],
            });
        }
    }

    log::info!("Generated {total} grid cells ({n_cols}x{n_rows}, cell {width:.3} x {height:.3})");

    Ok(cells)
}

/// Intersects every cell with `boundary`.
///
/// Order and identifiers are preserved. Cells outside the boundary are
/// retained with an empty geometry, and cells entirely inside keep their
/// original geometry. Partially clipped cells record `boundary` as a clip
/// mask so that points on the boundary itself still land in them.
/// Clipping an already clipped grid again with the same boundary yields
/// equal cells.
///
/// # Errors
///
/// Returns [`SpatialError::Geometry`] if the boundary is empty, degenerate
/// or invalid.
pub fn clip(grid: &[GridCell], boundary: &MultiPolygon<f64>) -> Result<Vec<GridCell>, SpatialError> {
    let boundary_rect = require_polygonal(boundary, "clip", "boundary")?;
    let mask = Arc::new(boundary.clone());

    let clipped: Vec<GridCell> = grid
        .par_iter()
        .map(|cell| clip_cell(cell, &mask, &boundary_rect))
        .collect();

    let empty = clipped.iter().filter(|c| c.is_empty()).count();
    log::info!(
        "Clipped {} grid cells to boundary ({} intersect, {empty} empty)",
        clipped.len(),
        clipped.len() - empty
    );

    Ok(clipped)
}

/// [`make_grid`] followed by [`clip`].
///
/// # Errors
///
/// See [`make_grid`].
pub fn make_clipped_grid(
    boundary: &MultiPolygon<f64>,
    n_cols: u32,
    n_rows: u32,
) -> Result<Vec<GridCell>, SpatialError> {
    let grid = make_grid(boundary, n_cols, n_rows)?;
    clip(&grid, boundary)
}

fn clip_cell(cell: &GridCell, mask: &Arc<MultiPolygon<f64>>, boundary_rect: &Rect<f64>) -> GridCell {
    if cell.clip_masks.iter().any(|m| m == mask) {
        return cell.clone();
    }

    match clip_geometry(&cell.geometry, mask, boundary_rect) {
        Clipped::Unchanged => cell.clone(),
        Clipped::Empty => GridCell {
            geometry: MultiPolygon(vec![]),
            clip_masks: vec![],
            ..cell.clone()
        },
        Clipped::Partial(geometry) => {
            let mut clip_masks = cell.clip_masks.clone();
            clip_masks.push(Arc::clone(mask));
            GridCell {
                geometry,
                clip_masks,
                ..cell.clone()
            }
        }
    }
}

enum Clipped {
    Unchanged,
    Empty,
    Partial(MultiPolygon<f64>),
}

fn clip_geometry(
    geometry: &MultiPolygon<f64>,
    boundary: &MultiPolygon<f64>,
    boundary_rect: &Rect<f64>,
) -> Clipped {
    let Some(cell_rect) = geometry.bounding_rect() else {
        return Clipped::Empty;
    };
    if !cell_rect.intersects(boundary_rect) {
        return Clipped::Empty;
    }

    let original_area = geometry.unsigned_area();
    let clipped = geometry.intersection(boundary);
    let clipped_area = clipped.unsigned_area();

    if clipped_area <= 0.0 {
        return Clipped::Empty;
    }
    if ((original_area - clipped_area) / original_area).abs() <= UNCLIPPED_TOLERANCE {
        return Clipped::Unchanged;
    }
    Clipped::Partial(clipped)
}

fn check_dimensions(n_cols: u32, n_rows: u32, operation: &'static str) -> Result<u32, SpatialError> {
    if n_cols == 0 || n_rows == 0 {
        return Err(SpatialError::geometry(
            operation,
            format!("{n_cols}x{n_rows}"),
            "grid dimensions must be positive",
        ));
    }
    n_cols.checked_mul(n_rows).ok_or_else(|| {
        SpatialError::geometry(
            operation,
            format!("{n_cols}x{n_rows}"),
            "too many grid cells",
        )
    })
}
