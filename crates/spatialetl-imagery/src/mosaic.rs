//! Mosaic assembly from a rectangle of tiles.
//!
//! Tiles are fetched row by row, top to bottom, and left to right within a
//! row. Each tile is checked against the provider's placeholder; the first
//! missing tile stops assembly and is reported as
//! [`Assembly::MissingTile`], because one gap makes the whole rectangle
//! unusable at that level.
//!
//! With `parallel` enabled every tile of a row is fetched on the rayon pool
//! before any of them is inspected. The outcomes are then scanned in column
//! order, so the reported missing tile, and whether a fetch error or a
//! missing tile ends the row, are the same as in sequential mode. Rows are
//! still assembled one at a time, so a missing tile stops the mosaic before
//! later rows are requested.

use crate::fetcher::{TileRaster, TileSource};
use crate::null_tile::NullTileDetector;
use crate::tile_system::{tile_to_quadkey, TileIndex, TILE_SIZE};
use crate::{ImageryError, Result};
use image::{imageops, RgbImage};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Inclusive rectangle of tile indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    /// First tile column.
    pub x_start: i64,
    /// Last tile column (inclusive).
    pub x_end: i64,
    /// First tile row.
    pub y_start: i64,
    /// Last tile row (inclusive).
    pub y_end: i64,
}

impl TileRect {
    /// Rectangle spanning two corner tiles.
    pub fn from_corners(top_left: TileIndex, bottom_right: TileIndex) -> Self {
        Self {
            x_start: top_left.x,
            x_end: bottom_right.x,
            y_start: top_left.y,
            y_end: bottom_right.y,
        }
    }

    /// Number of tile columns.
    pub fn columns(&self) -> u32 {
        (self.x_end - self.x_start + 1).max(0) as u32
    }

    /// Number of tile rows.
    pub fn rows(&self) -> u32 {
        (self.y_end - self.y_start + 1).max(0) as u32
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u64 {
        self.columns() as u64 * self.rows() as u64
    }

    /// Top-left tile.
    pub fn origin(&self) -> TileIndex {
        TileIndex::new(self.x_start, self.y_start)
    }
}

/// Result of assembling a row or mosaic.
#[derive(Debug)]
pub enum Assembly {
    /// Every tile was present; the stitched raster.
    Complete(RgbImage),
    /// A tile held the provider's placeholder.
    MissingTile(TileIndex),
}

/// Why a single tile could not be placed.
enum TileFailure {
    Missing(TileIndex),
    Error(ImageryError),
}

/// Fetches, validates and stitches tiles at a fixed level.
pub struct MosaicAssembler<'a, S: TileSource + ?Sized> {
    source: &'a S,
    detector: &'a NullTileDetector,
    parallel: bool,
}

impl<'a, S: TileSource + ?Sized> MosaicAssembler<'a, S> {
    /// Create an assembler that fetches tiles one at a time.
    pub fn new(source: &'a S, detector: &'a NullTileDetector) -> Self {
        Self {
            source,
            detector,
            parallel: false,
        }
    }

    /// Fetch the tiles of each row concurrently.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn fetch_valid(&self, tile: TileIndex, level: u8) -> std::result::Result<TileRaster, TileFailure> {
        let quadkey = tile_to_quadkey(tile, level);
        debug!(level, tile_x = tile.x, tile_y = tile.y, quadkey = %quadkey, "Fetching tile");

        let image = self.source.fetch(&quadkey).map_err(TileFailure::Error)?;
        match self.detector.is_valid(self.source, &image) {
            Ok(true) => Ok(image),
            Ok(false) => Err(TileFailure::Missing(tile)),
            Err(e) => Err(TileFailure::Error(e)),
        }
    }

    /// Fetch tiles `x_start..=x_end` of row `y` and stitch them left to right.
    ///
    /// The row raster is `(x_end - x_start + 1) * 256` wide and 256 high.
    pub fn assemble_row(&self, x_start: i64, x_end: i64, y: i64, level: u8) -> Result<Assembly> {
        let fetch = |x: i64| self.fetch_valid(TileIndex::new(x, y), level);
        let tiles: std::result::Result<Vec<TileRaster>, TileFailure> = if self.parallel {
            let fetched: Vec<_> = (x_start..=x_end).into_par_iter().map(fetch).collect();
            fetched.into_iter().collect()
        } else {
            (x_start..=x_end).map(fetch).collect()
        };

        let tiles = match tiles {
            Ok(tiles) => tiles,
            Err(TileFailure::Missing(tile)) => {
                warn!(
                    level,
                    tile_x = tile.x,
                    tile_y = tile.y,
                    "Cannot find tile image at zoom level"
                );
                return Ok(Assembly::MissingTile(tile));
            }
            Err(TileFailure::Error(e)) => return Err(e),
        };

        let mut row = RgbImage::new(tiles.len() as u32 * TILE_SIZE, TILE_SIZE);
        for (i, tile) in tiles.iter().enumerate() {
            imageops::replace(&mut row, tile, i as i64 * TILE_SIZE as i64, 0);
        }
        Ok(Assembly::Complete(row))
    }

    /// Assemble every row of `rect` and stack them top to bottom.
    pub fn assemble_mosaic(&self, rect: TileRect, level: u8) -> Result<Assembly> {
        debug!(
            level,
            columns = rect.columns(),
            rows = rect.rows(),
            "Assembling mosaic"
        );

        let mut mosaic = RgbImage::new(rect.columns() * TILE_SIZE, rect.rows() * TILE_SIZE);
        for y in rect.y_start..=rect.y_end {
            match self.assemble_row(rect.x_start, rect.x_end, y, level)? {
                Assembly::Complete(row) => {
                    let offset = (y - rect.y_start) * TILE_SIZE as i64;
                    imageops::replace(&mut mosaic, &row, 0, offset);
                }
                missing @ Assembly::MissingTile(_) => return Ok(missing),
            }
        }
        Ok(Assembly::Complete(mosaic))
    }
}
