//! Detection of the provider's "no data" tile.
//!
//! Imagery services in this family do not expose a tile-exists query.
//! Requests for tiles without coverage still succeed, returning a constant
//! placeholder image. [`NullTileDetector`] learns that placeholder by
//! fetching a quadkey that is guaranteed to have no imagery, then treats any
//! tile with identical pixels as missing.
//!
//! The comparison is exact. A provider whose placeholder varies between
//! requests (embedded timestamps, re-encoding noise) makes every placeholder
//! look like real imagery.

use crate::config::DEFAULT_NULL_QUADKEY;
use crate::fetcher::{TileRaster, TileSource};
use crate::telemetry::metric_defs;
use crate::tile_system::QuadKey;
use crate::{ImageryError, Result};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Lazily-initialized reference to the provider's placeholder tile.
///
/// The placeholder is fetched at most once per detector. Initialization
/// holds a lock so concurrent first callers wait for a single fetch.
#[derive(Debug)]
pub struct NullTileDetector {
    probe: QuadKey,
    reference: Mutex<Option<Arc<TileRaster>>>,
}

impl Default for NullTileDetector {
    fn default() -> Self {
        Self {
            probe: QuadKey::from_digits_unchecked(DEFAULT_NULL_QUADKEY),
            reference: Mutex::new(None),
        }
    }
}

impl NullTileDetector {
    /// Create a detector that probes `probe` for the placeholder.
    pub fn new(probe: QuadKey) -> Self {
        Self {
            probe,
            reference: Mutex::new(None),
        }
    }

    /// Create a detector with a known placeholder, skipping the probe fetch.
    pub fn with_reference(reference: TileRaster) -> Self {
        Self {
            probe: QuadKey::from_digits_unchecked(DEFAULT_NULL_QUADKEY),
            reference: Mutex::new(Some(Arc::new(reference))),
        }
    }

    /// Whether the placeholder has been fetched.
    pub fn is_initialized(&self) -> bool {
        self.reference
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// The placeholder tile, fetching it from `source` on first use.
    pub fn reference<S: TileSource + ?Sized>(&self, source: &S) -> Result<Arc<TileRaster>> {
        let mut reference = self
            .reference
            .lock()
            .map_err(|_| ImageryError::CacheLockPoisoned)?;

        if let Some(tile) = reference.as_ref() {
            return Ok(Arc::clone(tile));
        }

        debug!(quadkey = %self.probe, "Fetching null tile reference");
        let tile = Arc::new(source.fetch(&self.probe)?);
        *reference = Some(Arc::clone(&tile));
        Ok(tile)
    }

    /// Whether `image` holds real imagery (differs from the placeholder).
    pub fn is_valid<S: TileSource + ?Sized>(&self, source: &S, image: &TileRaster) -> Result<bool> {
        let reference = self.reference(source)?;
        let valid = !same_pixels(&reference, image);
        if !valid {
            metrics::counter!(metric_defs::NULL_TILES.name).increment(1);
        }
        Ok(valid)
    }
}

fn same_pixels(a: &TileRaster, b: &TileRaster) -> bool {
    a.dimensions() == b.dimensions() && a.as_raw() == b.as_raw()
}
