//! Retrieval configuration.
//!
//! Loaded from YAML; every field has a default so a partial file (or none
//! at all) is valid:
//!
//! ```yaml
//! base_url: "http://h0.ortho.tiles.virtualearth.net/tiles/a{quadkey}.jpeg?g=131"
//! max_image_area: 11366912
//! max_tiles: 1024
//! max_level: 23
//! min_level: 1
//! timeout_secs: 60
//! max_retries: 0
//! parallel_fetch: false
//! ```

use crate::tile_system::{quadkey_to_tile, MAX_LEVEL, MIN_LEVEL};
use crate::{ImageryError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Placeholder replaced by the tile quadkey in [`RetrievalConfig::base_url`].
pub const QUADKEY_PLACEHOLDER: &str = "{quadkey}";

/// Default imagery endpoint (Bing Maps aerial tiles).
pub const DEFAULT_BASE_URL: &str =
    "http://h0.ortho.tiles.virtualearth.net/tiles/a{quadkey}.jpeg?g=131";

/// Default maximum cropped image area in pixels.
pub const DEFAULT_MAX_IMAGE_AREA: u64 = 1192 * 1192 * 8;

/// Default maximum number of tiles fetched for one level.
///
/// Bounds the mosaic allocation for thin boxes whose cropped area fits the
/// budget while spanning thousands of tiles.
pub const DEFAULT_MAX_TILES: u64 = 1024;

/// Quadkey that the provider never has imagery for.
pub const DEFAULT_NULL_QUADKEY: &str = "11111111111111111111";

/// Settings for [`AerialImageRetrieval`](crate::AerialImageRetrieval) and
/// [`HttpTileFetcher`](crate::HttpTileFetcher).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Tile URL template containing `{quadkey}`.
    pub base_url: String,
    /// Largest permitted cropped image, in pixels (width x height).
    pub max_image_area: u64,
    /// Largest number of tiles fetched for a single level.
    pub max_tiles: u64,
    /// Finest level tried first.
    pub max_level: u8,
    /// Coarsest level tried last.
    pub min_level: u8,
    /// Quadkey probed once to learn the provider's "no data" image.
    pub null_quadkey: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra attempts for transient fetch failures. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before each retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Fetch the tiles of a mosaic row concurrently.
    pub parallel_fetch: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_image_area: DEFAULT_MAX_IMAGE_AREA,
            max_tiles: DEFAULT_MAX_TILES,
            max_level: MAX_LEVEL,
            min_level: MIN_LEVEL,
            null_quadkey: DEFAULT_NULL_QUADKEY.to_string(),
            timeout_secs: 60,
            max_retries: 0,
            retry_delay_ms: 500,
            parallel_fetch: false,
        }
    }
}

impl RetrievalConfig {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RetrievalConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings describe a usable retrieval.
    pub fn validate(&self) -> Result<()> {
        for level in [self.min_level, self.max_level] {
            if !(MIN_LEVEL..=MAX_LEVEL).contains(&level) {
                return Err(ImageryError::InvalidZoomLevel(level));
            }
        }
        if self.min_level > self.max_level {
            return Err(ImageryError::InvalidConfig(format!(
                "min_level {} is greater than max_level {}",
                self.min_level, self.max_level
            )));
        }
        if !self.base_url.contains(QUADKEY_PLACEHOLDER) {
            return Err(ImageryError::InvalidConfig(format!(
                "base_url must contain {}",
                QUADKEY_PLACEHOLDER
            )));
        }
        if self.max_image_area == 0 {
            return Err(ImageryError::InvalidConfig(
                "max_image_area must be positive".to_string(),
            ));
        }
        if self.max_tiles == 0 {
            return Err(ImageryError::InvalidConfig(
                "max_tiles must be positive".to_string(),
            ));
        }
        quadkey_to_tile(&self.null_quadkey)?;
        Ok(())
    }

    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry delay as a duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Levels in the order they are tried, finest first.
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        (self.min_level..=self.max_level).rev()
    }
}
