//! Geographic bounding box given by two opposite corners.

use crate::tile_system::{latlon_to_pixel, PixelCoord};
use crate::{ImageryError, Result};

/// Two geographic corners in degrees.
///
/// The corners may be given in any order; [`BoundingBox::pixel_bounds`]
/// normalizes them to top-left / bottom-right at a given level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
}

impl BoundingBox {
    /// Create a bounding box from two corners.
    ///
    /// Returns an error if any coordinate is NaN or infinite. Finite values
    /// outside the projection's range are accepted and clamped later.
    pub fn new(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<Self> {
        for (lat, lon) in [(lat1, lon1), (lat2, lon2)] {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(ImageryError::InvalidCoordinate { lat, lon });
            }
        }
        Ok(Self {
            lat1,
            lon1,
            lat2,
            lon2,
        })
    }

    /// Pixel rectangle at `level` as (top-left, bottom-right).
    pub fn pixel_bounds(&self, level: u8) -> (PixelCoord, PixelCoord) {
        let a = latlon_to_pixel(self.lat1, self.lon1, level);
        let b = latlon_to_pixel(self.lat2, self.lon2, level);
        (
            PixelCoord::new(a.x.min(b.x), a.y.min(b.y)),
            PixelCoord::new(a.x.max(b.x), a.y.max(b.y)),
        )
    }

    /// Pixel width and height spanned at `level`.
    pub fn pixel_span(&self, level: u8) -> (i64, i64) {
        let (tl, br) = self.pixel_bounds(level);
        (br.x - tl.x, br.y - tl.y)
    }

    /// Pixel area spanned at `level`.
    pub fn pixel_area(&self, level: u8) -> i64 {
        let (w, h) = self.pixel_span(level);
        w * h
    }

    pub(crate) fn invalid(&self) -> ImageryError {
        ImageryError::InvalidBoundingBox {
            lat1: self.lat1,
            lon1: self.lon1,
            lat2: self.lat2,
            lon2: self.lon2,
        }
    }
}
