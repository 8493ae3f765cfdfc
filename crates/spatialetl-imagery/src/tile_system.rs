//! Quadtree tile system coordinate math.
//!
//! Converts between geographic coordinates, global pixel coordinates, tile
//! indices and quadkeys for a spherical Mercator tile pyramid of 256x256
//! tiles.
//!
//! ## Coordinate System
//!
//! - Pixel space at level `l` is `256 * 2^l` pixels wide and high
//! - `(0, 0)` is the north-west corner at (85.05°N, 180°W)
//! - Tile `(x, y)` covers pixels `[256x, 256x + 255] x [256y, 256y + 255]`
//! - A quadkey has one base-4 digit per level, coarsest level first
//!
//! Every function here is pure. Out-of-range latitudes and longitudes are
//! clamped to the projection's valid range rather than rejected.

use crate::{ImageryError, Result};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Tile edge length in pixels.
pub const TILE_SIZE: u32 = 256;

/// Finest level of detail in the tiling scheme.
pub const MAX_LEVEL: u8 = 23;

/// Coarsest level of detail used for retrieval.
pub const MIN_LEVEL: u8 = 1;

/// Northern limit of the projection, `atan(sinh(π))` in degrees.
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Southern limit of the projection.
pub const MIN_LATITUDE: f64 = -85.05112878;

/// Western limit of longitude.
pub const MIN_LONGITUDE: f64 = -180.0;

/// Eastern limit of longitude.
pub const MAX_LONGITUDE: f64 = 180.0;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// A position in the global pixel space of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelCoord {
    /// Column, increasing eastward.
    pub x: i64,
    /// Row, increasing southward.
    pub y: i64,
}

impl PixelCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Index of one 256x256 tile within a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIndex {
    /// Tile column.
    pub x: i64,
    /// Tile row.
    pub y: i64,
}

impl TileIndex {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Base-4 address of a tile; the identifier sent to the imagery service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuadKey(String);

impl QuadKey {
    /// Wrap digits already known to be a valid quadkey.
    pub(crate) fn from_digits_unchecked(digits: &str) -> Self {
        QuadKey(digits.to_string())
    }

    /// The quadkey digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Level of detail encoded by this quadkey (its length).
    pub fn level(&self) -> u8 {
        self.0.len() as u8
    }

    /// Decode into a tile index and level.
    pub fn to_tile(&self) -> Result<(TileIndex, u8)> {
        quadkey_to_tile(&self.0)
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QuadKey {
    type Err = ImageryError;

    fn from_str(s: &str) -> Result<Self> {
        quadkey_to_tile(s)?;
        Ok(QuadKey(s.to_string()))
    }
}

/// Width and height of the whole map at `level`, in pixels.
#[inline]
pub fn map_size(level: u8) -> i64 {
    (TILE_SIZE as i64) << level
}

/// Ground distance covered by one pixel at `lat` and `level`, in meters.
pub fn ground_resolution(lat: f64, level: u8) -> f64 {
    let lat = lat.clamp(MIN_LATITUDE, MAX_LATITUDE);
    (lat * PI / 180.0).cos() * 2.0 * PI * EARTH_RADIUS_M / map_size(level) as f64
}

/// Convert a geographic coordinate to global pixel coordinates at `level`.
///
/// Returns the pixel containing the coordinate (floor of the projected
/// position), so the pixel span of two fixed points never shrinks as the
/// level increases.
pub fn latlon_to_pixel(lat: f64, lon: f64, level: u8) -> PixelCoord {
    let lat = lat.clamp(MIN_LATITUDE, MAX_LATITUDE);
    let lon = lon.clamp(MIN_LONGITUDE, MAX_LONGITUDE);

    let x = (lon + 180.0) / 360.0;
    let sin_lat = (lat * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

    let size = map_size(level) as f64;
    let max = size - 1.0;
    PixelCoord {
        x: (x * size).floor().clamp(0.0, max) as i64,
        y: (y * size).floor().clamp(0.0, max) as i64,
    }
}

/// Convert global pixel coordinates at `level` back to (latitude, longitude).
pub fn pixel_to_latlon(pixel: PixelCoord, level: u8) -> (f64, f64) {
    let size = map_size(level);
    let x = pixel.x.clamp(0, size - 1) as f64 / size as f64 - 0.5;
    let y = 0.5 - pixel.y.clamp(0, size - 1) as f64 / size as f64;

    let lat = 90.0 - 360.0 * (-y * 2.0 * PI).exp().atan() / PI;
    let lon = 360.0 * x;
    (lat, lon)
}

/// Tile containing a pixel.
#[inline]
pub fn pixel_to_tile(pixel: PixelCoord) -> TileIndex {
    let size = TILE_SIZE as i64;
    TileIndex {
        x: pixel.x.div_euclid(size),
        y: pixel.y.div_euclid(size),
    }
}

/// Top-left pixel of a tile.
#[inline]
pub fn tile_to_pixel(tile: TileIndex) -> PixelCoord {
    let size = TILE_SIZE as i64;
    PixelCoord {
        x: tile.x * size,
        y: tile.y * size,
    }
}

/// Encode a tile index at `level` as a quadkey.
pub fn tile_to_quadkey(tile: TileIndex, level: u8) -> QuadKey {
    let mut key = String::with_capacity(level as usize);
    for i in (1..=level).rev() {
        let mask = 1i64 << (i - 1);
        let mut digit = b'0';
        if tile.x & mask != 0 {
            digit += 1;
        }
        if tile.y & mask != 0 {
            digit += 2;
        }
        key.push(digit as char);
    }
    QuadKey(key)
}

/// Decode a quadkey into its tile index and level.
pub fn quadkey_to_tile(quadkey: &str) -> Result<(TileIndex, u8)> {
    if quadkey.is_empty() {
        return Err(ImageryError::InvalidQuadkey(quadkey.to_string()));
    }
    if quadkey.len() > MAX_LEVEL as usize {
        return Err(ImageryError::InvalidZoomLevel(
            quadkey.len().min(u8::MAX as usize) as u8,
        ));
    }

    let level = quadkey.len() as u8;
    let mut tile = TileIndex::new(0, 0);
    for (i, c) in quadkey.chars().enumerate() {
        let mask = 1i64 << (level as usize - i - 1);
        match c {
            '0' => {}
            '1' => tile.x |= mask,
            '2' => tile.y |= mask,
            '3' => {
                tile.x |= mask;
                tile.y |= mask;
            }
            _ => return Err(ImageryError::InvalidQuadkey(quadkey.to_string())),
        }
    }
    Ok((tile, level))
}
