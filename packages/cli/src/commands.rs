//! Subcommand implementations.
//!
//! Each command loads its layers through [`Context::load`], which applies
//! attribute filters and projects into the working CRS, then runs one
//! pipeline and writes its product.

use std::path::{Path, PathBuf};

use clap::Args;
use density_map_density::{DensityEstimator, to_polygons};
use density_map_geometry::crs::{BuiltinRegistry, Crs, CrsRegistry};
use density_map_geometry::store::GeometryStore;
use density_map_geometry_models::{Kernel, PointFeature, Region, RegionSummary};
use indicatif::MultiProgress;

use crate::config::PipelineConfig;
use crate::error::CliError;
use crate::io;
use crate::progress::IndicatifProgress;

/// Number of top regions or cells listed in the log summary.
const TOP_N: usize = 5;

#[derive(Args)]
pub struct CountArgs {
    /// Point layer (GeoJSON FeatureCollection)
    #[arg(long)]
    points: PathBuf,

    /// Region layer (GeoJSON FeatureCollection of polygons)
    #[arg(long)]
    regions: PathBuf,

    /// Region property holding the identifier
    #[arg(long)]
    id_field: Option<String>,

    /// Region property holding the display name
    #[arg(long)]
    name_field: Option<String>,

    /// Per-region summary JSON (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write the regions with their counts as GeoJSON
    #[arg(long)]
    geojson: Option<PathBuf>,
}

#[derive(Args)]
pub struct GridArgs {
    /// Point layer (GeoJSON FeatureCollection)
    #[arg(long)]
    points: PathBuf,

    /// Boundary layer; all regions passing the region filter are dissolved
    #[arg(long)]
    boundary: PathBuf,

    #[arg(long)]
    cols: Option<u32>,

    #[arg(long)]
    rows: Option<u32>,

    /// Grid cells GeoJSON (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
pub struct DensityArgs {
    /// Point layer (GeoJSON FeatureCollection)
    #[arg(long)]
    points: PathBuf,

    /// Observation window layer; all regions passing the region filter
    /// are dissolved
    #[arg(long)]
    window: PathBuf,

    /// Raster cells per side
    #[arg(long)]
    resolution: Option<usize>,

    /// Fixed bandwidth in working CRS units (Silverman's rule when omitted)
    #[arg(long)]
    bandwidth: Option<f64>,

    #[arg(long)]
    kernel: Option<Kernel>,

    /// Reweight points so kernel mass outside the window is not lost
    #[arg(long)]
    edge_correction: bool,

    /// Density cells GeoJSON (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Settings and shared handles for a single invocation.
pub struct Context<'a> {
    config: PipelineConfig,
    multi: &'a MultiProgress,
    registry: BuiltinRegistry,
}

impl<'a> Context<'a> {
    pub const fn new(config: PipelineConfig, multi: &'a MultiProgress) -> Self {
        Self {
            config,
            multi,
            registry: BuiltinRegistry,
        }
    }

    /// Reads both layers, filters them, and projects them into the
    /// working CRS.
    fn load(
        &self,
        points: &Path,
        regions: &Path,
        id_field: Option<&str>,
        name_field: Option<&str>,
    ) -> Result<GeometryStore, CliError> {
        let points = io::read_points(points)?;
        let regions_read = io::read_regions(regions, id_field, name_field)?;
        let mut store = GeometryStore::new(self.config.source_crs.clone(), points, regions_read);

        if let Some(filter) = &self.config.points.filter {
            store = store.filter_points(|p| filter.matches_point(p));
            log::info!("Point filter {filter}: {} points kept", store.points().len());
        }
        if let Some(filter) = &self.config.regions.filter {
            store = store.filter_regions(|r| filter.matches_region(r));
            log::info!("Region filter {filter}: {} regions kept", store.regions().len());
        }
        if store.regions().is_empty() {
            return Err(CliError::input(regions, "no regions left after filtering"));
        }

        store.validate_regions()?;

        if let Some(working) = &self.config.working_crs {
            store = store.reproject(working, None, &self.registry)?;
            log::info!("Projected layers into {working}");
        }

        self.warn_if_geographic(store.crs());

        Ok(store)
    }

    fn warn_if_geographic(&self, crs: Option<&Crs>) {
        let Some(crs) = crs else {
            log::warn!("No CRS configured; treating coordinates as planar");
            return;
        };
        match self.registry.is_geographic(crs) {
            Ok(true) => log::warn!(
                "Working CRS {crs} is geographic: areas are in square degrees and \
                 distances in degrees. Set working_crs to a projected CRS such as ESRI:102003"
            ),
            Ok(false) => {}
            Err(e) => log::warn!("Cannot classify CRS {crs}: {e}"),
        }
    }
}

/// `count`: points per region.
///
/// # Errors
///
/// Returns an error if loading, attribution or writing fails.
pub fn count(ctx: &Context<'_>, args: &CountArgs) -> Result<(), CliError> {
    let id_field = args.id_field.as_deref().or(ctx.config.regions.id_field.as_deref());
    let name_field = args
        .name_field
        .as_deref()
        .or(ctx.config.regions.name_field.as_deref());
    let store = ctx.load(&args.points, &args.regions, id_field, name_field)?;

    let bar = IndicatifProgress::points_bar(ctx.multi, "Counting points per region");
    let counts =
        density_map_spatial::assign_with_progress(store.points(), store.regions(), bar.as_ref())?;
    let summaries = density_map_spatial::summarize(store.regions(), &counts);

    log_top(&summaries);
    warn_uncovered(store.points(), store.regions())?;

    io::write_json(args.out.as_deref(), &summaries)?;
    if let Some(path) = &args.geojson {
        io::write_json(Some(path.as_path()), &io::region_features(store.regions(), &summaries))?;
    }

    Ok(())
}

/// `grid`: points per clipped grid cell.
///
/// # Errors
///
/// Returns an error if loading, gridding, attribution or writing fails.
pub fn grid(ctx: &Context<'_>, args: &GridArgs) -> Result<(), CliError> {
    let store = ctx.load(
        &args.points,
        &args.boundary,
        ctx.config.regions.id_field.as_deref(),
        ctx.config.regions.name_field.as_deref(),
    )?;
    let boundary = store.dissolve_regions()?;

    let cols = args.cols.unwrap_or(ctx.config.grid.cols);
    let rows = args.rows.unwrap_or(ctx.config.grid.rows);
    let (width, height) = density_map_grid::cell_size(&boundary, cols, rows)?;
    log::info!("Cell size {width:.1} x {height:.1}");

    let cells = density_map_grid::make_clipped_grid(&boundary, cols, rows)?;

    let bar = IndicatifProgress::points_bar(ctx.multi, "Counting points per grid cell");
    let counts = density_map_spatial::assign_with_progress(store.points(), &cells, bar.as_ref())?;
    let summaries = density_map_spatial::summarize(&cells, &counts);

    log_top(&summaries);
    warn_uncovered(store.points(), &cells)?;

    io::write_json(args.out.as_deref(), &io::grid_features(&cells, &summaries))
}

/// `density`: kernel density surface over a window.
///
/// # Errors
///
/// Returns an error if loading, estimation or writing fails.
pub fn density(ctx: &Context<'_>, args: &DensityArgs) -> Result<(), CliError> {
    let store = ctx.load(
        &args.points,
        &args.window,
        ctx.config.regions.id_field.as_deref(),
        ctx.config.regions.name_field.as_deref(),
    )?;
    let window = store.dissolve_regions()?;

    let settings = &ctx.config.density;
    let rule = args.bandwidth.map_or_else(
        || settings.bandwidth_rule(),
        density_map_density::BandwidthRule::Fixed,
    );
    let correction = if args.edge_correction {
        density_map_density::EdgeCorrection::Reweight
    } else {
        settings.edge_correction_mode()
    };

    let estimator = DensityEstimator::new(args.resolution.unwrap_or(settings.resolution))
        .kernel(args.kernel.unwrap_or(settings.kernel))
        .bandwidth(rule)
        .edge_correction(correction)
        .progress(IndicatifProgress::raster_bar(ctx.multi, "Evaluating density"));

    let surface = estimator.estimate(store.points(), &window)?;
    log::info!(
        "Surface: bandwidth {:.1}, {} points, mass {:.1}, peak {:.3e}",
        surface.bandwidth,
        surface.point_count,
        surface.total_mass(),
        surface.max_value()
    );

    let cells = to_polygons(&surface);
    io::write_json(
        args.out.as_deref(),
        &io::density_features(&cells, &surface.normalized()),
    )
}

/// Logs how many points no region covers, with the first few locations
/// at debug level.
fn warn_uncovered<R: Region>(points: &[PointFeature], regions: &[R]) -> Result<(), CliError> {
    let missed = density_map_spatial::unassigned(points, regions)?;
    if missed.is_empty() {
        return Ok(());
    }
    log::warn!(
        "{} of {} points lie outside every area",
        missed.len(),
        points.len()
    );
    for &i in missed.iter().take(TOP_N) {
        let p = &points[i];
        log::debug!("  uncovered point #{i} at ({:.3}, {:.3})", p.x(), p.y());
    }
    Ok(())
}

fn log_top<Id: std::fmt::Display>(summaries: &[RegionSummary<Id>]) {
    let mut ranked: Vec<&RegionSummary<Id>> = summaries.iter().filter(|s| s.count > 0).collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));

    let total: u64 = summaries.iter().map(|s| s.count).sum();
    log::info!(
        "{total} points in {} of {} areas",
        ranked.len(),
        summaries.len()
    );
    for s in ranked.iter().take(TOP_N) {
        log::info!(
            "  {} {}: {}",
            s.region_id,
            s.name.as_deref().unwrap_or(""),
            s.count
        );
    }
}
