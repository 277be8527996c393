#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line harness for the density map pipeline.
//!
//! Loads GeoJSON point and region layers, projects them into a planar
//! working CRS, and writes one of three products: per-region counts for a
//! choropleth, counts over a regular grid clipped to a boundary, or a
//! kernel density surface over an observation window.
//!
//! Uses `indicatif-log-bridge` (via [`progress::init_logger`]) so log
//! lines and progress bars never fight for the terminal.

mod commands;
mod config;
mod error;
mod io;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use density_map_geometry::crs::Crs;

use crate::commands::{CountArgs, DensityArgs, GridArgs};
use crate::config::{AttributeFilter, PipelineConfig};
use crate::error::CliError;

#[derive(Parser)]
#[command(
    name = "density_map",
    about = "Point binning, grid aggregation and kernel density surfaces"
)]
struct Cli {
    /// Pipeline config TOML (defaults to the embedded Georgia settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CRS of the input files, e.g. EPSG:4326
    #[arg(long, global = true)]
    source_crs: Option<Crs>,

    /// Planar CRS to bin and estimate in, e.g. ESRI:102003
    #[arg(long, global = true)]
    working_crs: Option<Crs>,

    /// Keep only points whose attribute matches, e.g. category=Church
    #[arg(long, global = true)]
    filter: Option<AttributeFilter>,

    /// Keep only regions whose attribute matches, e.g. STATEFP=13
    #[arg(long, global = true)]
    region_filter: Option<AttributeFilter>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count points per region for a choropleth
    Count(CountArgs),
    /// Count points per cell of a grid clipped to a boundary
    Grid(GridArgs),
    /// Estimate a kernel density surface over an observation window
    Density(DensityArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::Grid(_) => "grid",
            Self::Density(_) => "density",
        }
    }
}

impl Cli {
    /// Loads the config file and applies the global flag overrides.
    fn resolve_config(&self) -> Result<PipelineConfig, CliError> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;

        if let Some(crs) = &self.source_crs {
            config.source_crs = Some(crs.clone());
        }
        if let Some(crs) = &self.working_crs {
            config.working_crs = Some(crs.clone());
        }
        if let Some(filter) = &self.filter {
            config.points.filter = Some(filter.clone());
        }
        if let Some(filter) = &self.region_filter {
            config.regions.filter = Some(filter.clone());
        }

        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = progress::init_logger();
    let cli = Cli::parse();

    let config = cli.resolve_config()?;
    let ctx = commands::Context::new(config, &multi);

    let result = match &cli.command {
        Commands::Count(args) => commands::count(&ctx, args),
        Commands::Grid(args) => commands::grid(&ctx, args),
        Commands::Density(args) => commands::density(&ctx, args),
    };

    if let Err(e) = result {
        log::error!("{} failed: {e}", cli.command.name());
        return Err(e.into());
    }

    Ok(())
}
