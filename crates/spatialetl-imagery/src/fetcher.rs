//! Tile retrieval from a quadkey-addressed imagery service.
//!
//! [`TileSource`] is the seam between the retrieval logic and the network:
//! the mosaic and null-tile detection only ever see decoded rasters, so
//! tests substitute an in-memory source.
//!
//! [`HttpTileFetcher`] is the production source. It builds the tile URL by
//! substituting the quadkey into a template, performs a blocking GET and
//! decodes the body (JPEG for Bing aerial tiles) into an RGB raster.
//!
//! ## Failure Handling
//!
//! Transport errors, non-success HTTP statuses and undecodable bodies all
//! surface as [`ImageryError::TileFetch`]. Transport failures and 5xx
//! responses are marked transient and retried up to `max_retries` times;
//! with the default of zero retries the first failure is returned.

use crate::config::{RetrievalConfig, QUADKEY_PLACEHOLDER};
use crate::telemetry::metric_defs;
use crate::tile_system::{QuadKey, TILE_SIZE};
use crate::{ImageryError, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A decoded 256x256 RGB tile.
pub type TileRaster = RgbImage;

/// Source of decoded tile rasters.
pub trait TileSource: Send + Sync {
    /// Fetch and decode the tile addressed by `quadkey`.
    fn fetch(&self, quadkey: &QuadKey) -> Result<TileRaster>;
}

impl<T: TileSource + ?Sized> TileSource for &T {
    fn fetch(&self, quadkey: &QuadKey) -> Result<TileRaster> {
        (**self).fetch(quadkey)
    }
}

impl<T: TileSource + ?Sized> TileSource for Box<T> {
    fn fetch(&self, quadkey: &QuadKey) -> Result<TileRaster> {
        (**self).fetch(quadkey)
    }
}

/// Download statistics for the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of tiles downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
    /// Retries issued after transient failures.
    pub retries: usize,
}

/// Blocking HTTP tile fetcher.
pub struct HttpTileFetcher {
    /// URL template containing `{quadkey}`.
    base_url: String,
    /// HTTP client for downloading tiles.
    client: reqwest::blocking::Client,
    /// Extra attempts for transient failures.
    max_retries: u32,
    /// Delay before each retry.
    retry_delay: Duration,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    retries: AtomicUsize,
}

impl std::fmt::Debug for HttpTileFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTileFetcher")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpTileFetcher {
    /// Create a fetcher from retrieval settings.
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        if !config.base_url.contains(QUADKEY_PLACEHOLDER) {
            return Err(ImageryError::InvalidConfig(format!(
                "base_url must contain {}",
                QUADKEY_PLACEHOLDER
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            retries: AtomicUsize::new(0),
        })
    }

    /// URL of the tile addressed by `quadkey`.
    pub fn tile_url(&self, quadkey: &QuadKey) -> String {
        self.base_url.replace(QUADKEY_PLACEHOLDER, quadkey.as_str())
    }

    /// Get download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Single GET of the encoded tile body.
    fn download(&self, quadkey: &QuadKey) -> Result<Vec<u8>> {
        let url = self.tile_url(quadkey);
        debug!(quadkey = %quadkey, url = %url, "Downloading tile");

        let response = self.client.get(&url).send().map_err(|e| ImageryError::TileFetch {
            quadkey: quadkey.to_string(),
            reason: e.to_string(),
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageryError::TileFetch {
                quadkey: quadkey.to_string(),
                reason: format!("HTTP {}", status),
                transient: status.is_server_error(),
            });
        }

        let bytes = response.bytes().map_err(|e| ImageryError::TileFetch {
            quadkey: quadkey.to_string(),
            reason: e.to_string(),
            transient: true,
        })?;

        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        metrics::counter!(metric_defs::TILE_BYTES.name).increment(bytes.len() as u64);

        Ok(bytes.to_vec())
    }
}

impl TileSource for HttpTileFetcher {
    fn fetch(&self, quadkey: &QuadKey) -> Result<TileRaster> {
        let start = Instant::now();
        let mut attempt = 0;
        let bytes = loop {
            match self.download(quadkey) {
                Ok(bytes) => break bytes,
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_defs::FETCH_RETRIES.name).increment(1);
                    warn!(
                        quadkey = %quadkey,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Transient tile fetch failure, retrying"
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        };

        let tile = decode_tile(quadkey, &bytes)?;

        metrics::counter!(metric_defs::TILES_FETCHED.name).increment(1);
        metrics::histogram!(metric_defs::TILE_FETCH_DURATION.name)
            .record(start.elapsed().as_secs_f64());
        Ok(tile)
    }
}

/// Decode an encoded tile body into a 256x256 RGB raster.
pub fn decode_tile(quadkey: &QuadKey, bytes: &[u8]) -> Result<TileRaster> {
    let image = image::load_from_memory(bytes).map_err(|e| ImageryError::TileFetch {
        quadkey: quadkey.to_string(),
        reason: format!("undecodable tile body: {}", e),
        transient: false,
    })?;

    if image.width() != TILE_SIZE || image.height() != TILE_SIZE {
        return Err(ImageryError::TileFetch {
            quadkey: quadkey.to_string(),
            reason: format!(
                "unexpected tile size {}x{} (expected {}x{})",
                image.width(),
                image.height(),
                TILE_SIZE,
                TILE_SIZE
            ),
            transient: false,
        });
    }

    Ok(image.to_rgb8())
}
