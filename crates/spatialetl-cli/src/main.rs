//! spatialetl - aerial imagery retrieval from the command line.
//!
//! ```text
//! spatialetl aerial 51.62 -68.45 51.39 -68.31 manicouagan.png
//! spatialetl aerial 51.62 -68.45 51.39 -68.31 out.jpg --config imagery.yaml --parallel
//! spatialetl quadkey 47.6062 -122.3321 --level 15
//! ```
//!
//! Logging goes to stderr and honours `RUST_LOG`; `-v` raises the default
//! level to debug.

use clap::{Args, Parser, Subcommand};
use spatialetl_imagery::tile_system::{
    ground_resolution, latlon_to_pixel, pixel_to_tile, tile_to_quadkey,
};
use spatialetl_imagery::{
    telemetry, AerialImageRetrieval, BoundingBox, ImageryError, RetrievalConfig,
};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "spatialetl")]
#[command(about = "Retrieve stitched aerial imagery for a geographic bounding box")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve the best available aerial image of a bounding box
    Aerial(AerialArgs),
    /// Show the pixel, tile and quadkey of a coordinate at one level
    Quadkey(QuadkeyArgs),
}

#[derive(Args, Debug)]
struct AerialArgs {
    /// Latitude of the first corner
    #[arg(allow_negative_numbers = true)]
    lat1: f64,

    /// Longitude of the first corner
    #[arg(allow_negative_numbers = true)]
    lon1: f64,

    /// Latitude of the opposite corner
    #[arg(allow_negative_numbers = true)]
    lat2: f64,

    /// Longitude of the opposite corner
    #[arg(allow_negative_numbers = true)]
    lon2: f64,

    /// Output image; the format follows the extension (.png, .jpg, .tif, ...)
    output: PathBuf,

    /// YAML retrieval configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Largest permitted image area in pixels
    #[arg(long)]
    max_area: Option<u64>,

    /// Finest zoom level to try
    #[arg(long)]
    max_level: Option<u8>,

    /// Coarsest zoom level to try
    #[arg(long)]
    min_level: Option<u8>,

    /// Largest number of tiles fetched for one zoom level
    #[arg(long)]
    max_tiles: Option<u64>,

    /// Tile URL template containing {quadkey}
    #[arg(long)]
    base_url: Option<String>,

    /// Retries for transient fetch failures
    #[arg(long)]
    retries: Option<u32>,

    /// Fetch the tiles of each row concurrently
    #[arg(long)]
    parallel: bool,
}

#[derive(Args, Debug)]
struct QuadkeyArgs {
    /// Latitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    lat: f64,

    /// Longitude in decimal degrees
    #[arg(allow_negative_numbers = true)]
    lon: f64,

    /// Level of detail
    #[arg(short, long, default_value = "15")]
    level: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    telemetry::describe_metrics();

    process::exit(exit_code(run(cli.command)));
}

fn run(command: Command) -> Result<(), ImageryError> {
    match command {
        Command::Aerial(args) => run_aerial(args),
        Command::Quadkey(args) => run_quadkey(args),
    }
}

/// Report a failure through the log and map it to the process status.
fn exit_code(result: Result<(), ImageryError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the configuration file (or defaults) and apply command-line overrides.
fn build_config(args: &AerialArgs) -> Result<RetrievalConfig, ImageryError> {
    let mut config = match &args.config {
        Some(path) => RetrievalConfig::from_file(path)?,
        None => RetrievalConfig::default(),
    };

    if let Some(max_area) = args.max_area {
        config.max_image_area = max_area;
    }
    if let Some(max_tiles) = args.max_tiles {
        config.max_tiles = max_tiles;
    }
    if let Some(max_level) = args.max_level {
        config.max_level = max_level;
    }
    if let Some(min_level) = args.min_level {
        config.min_level = min_level;
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if args.parallel {
        config.parallel_fetch = true;
    }

    config.validate()?;
    Ok(config)
}

fn run_aerial(args: AerialArgs) -> Result<(), ImageryError> {
    let config = build_config(&args)?;
    let bbox = BoundingBox::new(args.lat1, args.lon1, args.lat2, args.lon2)?;
    let retrieval = AerialImageRetrieval::from_config(config)?;

    let start = Instant::now();
    let level = retrieval.retrieve(&bbox, &args.output)?;
    let elapsed = start.elapsed().as_secs_f64();

    let stats = retrieval.source().download_stats();
    info!(
        tiles = stats.tiles_downloaded,
        bytes = stats.bytes_downloaded,
        retries = stats.retries,
        "Download statistics"
    );
    info!("Retrieval completed in {:.3} s", elapsed);

    println!(
        "Wrote {} at zoom level {} ({} tiles, {:.1} KiB downloaded, {:.3} s)",
        args.output.display(),
        level,
        stats.tiles_downloaded,
        stats.bytes_downloaded as f64 / 1024.0,
        elapsed
    );
    Ok(())
}

fn run_quadkey(args: QuadkeyArgs) -> Result<(), ImageryError> {
    if !(1..=spatialetl_imagery::MAX_LEVEL).contains(&args.level) {
        return Err(ImageryError::InvalidZoomLevel(args.level));
    }
    if !args.lat.is_finite() || !args.lon.is_finite() {
        return Err(ImageryError::InvalidCoordinate {
            lat: args.lat,
            lon: args.lon,
        });
    }

    let pixel = latlon_to_pixel(args.lat, args.lon, args.level);
    let tile = pixel_to_tile(pixel);
    let quadkey = tile_to_quadkey(tile, args.level);

    println!("Level:      {}", args.level);
    println!("Pixel:      ({}, {})", pixel.x, pixel.y);
    println!("Tile:       {}", tile);
    println!("Quadkey:    {}", quadkey);
    println!(
        "Resolution: {:.3} m/pixel",
        ground_resolution(args.lat, args.level)
    );
    Ok(())
}
