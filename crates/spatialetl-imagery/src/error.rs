//! Error types for the imagery crate.

use thiserror::Error;

/// Errors that can occur while retrieving aerial imagery.
#[derive(Debug, Error)]
pub enum ImageryError {
    /// I/O error writing the output raster.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// HTTP client error (building the client or reading a response).
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Configuration parsed but holds unusable values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The bounding box corners fall on the same (or adjacent) pixel.
    #[error("Bounding box ({lat1}, {lon1}) - ({lat2}, {lon2}) is smaller than one pixel")]
    InvalidBoundingBox {
        /// First corner latitude.
        lat1: f64,
        /// First corner longitude.
        lon1: f64,
        /// Second corner latitude.
        lat2: f64,
        /// Second corner longitude.
        lon2: f64,
    },

    /// A coordinate is not a finite number.
    #[error("Invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// No zoom level yields a complete mosaic within the size budget.
    #[error("No zoom level provides complete imagery within the size budget")]
    NoValidResolution,

    /// A tile could not be downloaded or decoded.
    #[error("Failed to fetch tile {quadkey}: {reason}")]
    TileFetch {
        /// Quadkey of the tile.
        quadkey: String,
        /// Reason for failure.
        reason: String,
        /// Whether retrying the same request may succeed.
        transient: bool,
    },

    /// Malformed quadkey string.
    #[error("Invalid quadkey '{0}' (must contain only digits 0-3)")]
    InvalidQuadkey(String),

    /// Zoom level outside the tiling scheme.
    #[error("Invalid zoom level {0} (must be 1-23)")]
    InvalidZoomLevel(u8),

    /// Null tile cache lock was poisoned (a thread panicked while holding the lock).
    #[error("Null tile cache lock was poisoned")]
    CacheLockPoisoned,
}

impl ImageryError {
    /// Whether this error is worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            ImageryError::TileFetch { transient, .. } => *transient,
            ImageryError::HttpRequest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
