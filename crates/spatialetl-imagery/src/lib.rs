//! # spatialetl-imagery
//!
//! Aerial imagery retrieval for an arbitrary geographic bounding box.
//!
//! Imagery services such as Bing Maps publish satellite/aerial imagery as a
//! quadtree pyramid of 256x256 tiles addressed by quadkey. This crate picks
//! the finest zoom level at which a bounding box is fully covered and fits
//! a pixel budget, stitches the tiles of that level into a mosaic, and crops
//! the mosaic to the exact pixel rectangle of the box.
//!
//! ## Overview
//!
//! - [`tile_system`] - pure coordinate math (lat/lon, pixels, tiles, quadkeys)
//! - [`HttpTileFetcher`] - downloads and decodes tiles; any [`TileSource`]
//!   can stand in for it
//! - [`NullTileDetector`] - recognises the provider's "no data" placeholder
//! - [`MosaicAssembler`] - fetches a rectangle of tiles and stitches them
//! - [`AerialImageRetrieval`] - zoom-level selection, cropping and output
//!
//! ## Example
//!
//! ```no_run
//! use spatialetl_imagery::{AerialImageRetrieval, BoundingBox, RetrievalConfig};
//!
//! let retrieval = AerialImageRetrieval::from_config(RetrievalConfig::default())?;
//! let bbox = BoundingBox::new(51.62, -68.45, 51.39, -68.31)?;
//!
//! match retrieval.retrieve(&bbox, "aerial.png") {
//!     Ok(level) => println!("Retrieved at zoom level {}", level),
//!     Err(e) => eprintln!("Retrieval failed: {}", e),
//! }
//! # Ok::<(), spatialetl_imagery::ImageryError>(())
//! ```

mod bbox;
mod config;
mod error;
mod fetcher;
mod mosaic;
mod null_tile;
mod retrieval;
pub mod telemetry;
pub mod tile_system;

pub use bbox::BoundingBox;
pub use config::{
    RetrievalConfig, DEFAULT_BASE_URL, DEFAULT_MAX_IMAGE_AREA, DEFAULT_MAX_TILES,
    DEFAULT_NULL_QUADKEY, QUADKEY_PLACEHOLDER,
};
pub use error::ImageryError;
pub use fetcher::{decode_tile, DownloadStats, HttpTileFetcher, TileRaster, TileSource};
pub use mosaic::{Assembly, MosaicAssembler, TileRect};
pub use null_tile::NullTileDetector;
pub use retrieval::{
    plan_level, AerialImageRetrieval, LevelPlan, LevelRejection, RetrievalState, Retrieved,
};
pub use tile_system::{PixelCoord, QuadKey, TileIndex, MAX_LEVEL, MIN_LEVEL, TILE_SIZE};

/// Result type for imagery operations.
pub type Result<T> = std::result::Result<T, ImageryError>;
