//! Zoom-level selection and retrieval of a cropped aerial image.
//!
//! Levels are tried from finest to coarsest. Each attempt ends in one of:
//!
//! | Outcome                | Next state                          |
//! |------------------------|-------------------------------------|
//! | mosaic complete        | `Success(level)`                    |
//! | pixel area over budget | `TryingLevel(level - 1)`            |
//! | too many tiles         | `TryingLevel(level - 1)`            |
//! | a tile is missing      | `TryingLevel(level - 1)`            |
//! | box spans ≤ 1 pixel    | `Invalid` at the finest level tried,|
//! |                        | otherwise `Exhausted`               |
//! | coarsest level failed  | `Exhausted`                         |
//!
//! Pixel spans never grow at coarser levels, so once a box collapses to a
//! single pixel no coarser level can help. It is only reported as an
//! invalid box when it is already degenerate at the finest level.
//!
//! Fetch errors (network, HTTP status, undecodable tiles) are not level
//! rejections: they abort the retrieval.

use crate::bbox::BoundingBox;
use crate::config::RetrievalConfig;
use crate::fetcher::{HttpTileFetcher, TileSource};
use crate::mosaic::{Assembly, MosaicAssembler, TileRect};
use crate::null_tile::NullTileDetector;
use crate::telemetry::metric_defs;
use crate::tile_system::{pixel_to_tile, tile_to_pixel, PixelCoord, QuadKey, TileIndex};
use crate::{ImageryError, Result};
use image::{imageops, ImageFormat, RgbImage};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Pixel and tile rectangle of a bounding box at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPlan {
    /// Level of detail.
    pub level: u8,
    /// Top-left pixel of the box.
    pub top_left: PixelCoord,
    /// Bottom-right pixel of the box (exclusive in the cropped output).
    pub bottom_right: PixelCoord,
    /// Tiles covering the box.
    pub tiles: TileRect,
}

impl LevelPlan {
    /// Output width in pixels.
    pub fn width(&self) -> u32 {
        (self.bottom_right.x - self.top_left.x) as u32
    }

    /// Output height in pixels.
    pub fn height(&self) -> u32 {
        (self.bottom_right.y - self.top_left.y) as u32
    }

    /// Output area in pixels.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Global pixel of the mosaic's top-left corner.
    pub fn mosaic_origin(&self) -> PixelCoord {
        tile_to_pixel(self.tiles.origin())
    }

    /// Crop an assembled mosaic of [`LevelPlan::tiles`] to the exact box.
    pub fn crop(&self, mosaic: &RgbImage) -> RgbImage {
        let origin = self.mosaic_origin();
        let x = (self.top_left.x - origin.x) as u32;
        let y = (self.top_left.y - origin.y) as u32;
        imageops::crop_imm(mosaic, x, y, self.width(), self.height()).to_image()
    }
}

/// Why a level cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelRejection {
    /// The box spans at most one pixel in some direction.
    Degenerate {
        /// Pixel width at the level.
        width: i64,
        /// Pixel height at the level.
        height: i64,
    },
    /// The cropped image would exceed the area budget.
    Oversized {
        /// Pixel area at the level.
        area: u64,
        /// Configured budget.
        max_area: u64,
    },
    /// The covering tile rectangle exceeds the tile cap.
    TooManyTiles {
        /// Tiles covering the box at the level.
        tiles: u64,
        /// Configured cap.
        max_tiles: u64,
    },
    /// A tile in the rectangle has no imagery.
    IncompleteCoverage {
        /// The first missing tile found.
        tile: TileIndex,
    },
}

impl LevelRejection {
    /// Whether the rejection ends the retrieval instead of trying a coarser level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LevelRejection::Degenerate { .. })
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            LevelRejection::Degenerate { .. } => "degenerate",
            LevelRejection::Oversized { .. } => "oversized",
            LevelRejection::TooManyTiles { .. } => "too_many_tiles",
            LevelRejection::IncompleteCoverage { .. } => "incomplete",
        }
    }
}

/// Compute the plan for `bbox` at `level`, or why the level is unusable
/// before any tile is fetched.
///
/// `max_area` bounds the cropped output; `max_tiles` bounds the mosaic
/// (and the number of requests) behind it.
pub fn plan_level(
    bbox: &BoundingBox,
    level: u8,
    max_area: u64,
    max_tiles: u64,
) -> std::result::Result<LevelPlan, LevelRejection> {
    let (top_left, bottom_right) = bbox.pixel_bounds(level);
    let width = bottom_right.x - top_left.x;
    let height = bottom_right.y - top_left.y;

    if width <= 1 || height <= 1 {
        return Err(LevelRejection::Degenerate { width, height });
    }

    let area = width as u64 * height as u64;
    if area > max_area {
        return Err(LevelRejection::Oversized { area, max_area });
    }

    let tiles = TileRect::from_corners(pixel_to_tile(top_left), pixel_to_tile(bottom_right));
    if tiles.tile_count() > max_tiles {
        return Err(LevelRejection::TooManyTiles {
            tiles: tiles.tile_count(),
            max_tiles,
        });
    }

    Ok(LevelPlan {
        level,
        top_left,
        bottom_right,
        tiles,
    })
}

/// State of the zoom-level search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    /// Attempting the given level.
    TryingLevel(u8),
    /// The given level produced a complete image.
    Success(u8),
    /// The bounding box cannot produce an image at any level.
    Invalid,
    /// Every level was rejected.
    Exhausted,
}

impl RetrievalState {
    /// State after the attempt at `level` ended with `rejection`
    /// (`None` for a complete mosaic), searching `config`'s level range.
    pub fn next(level: u8, rejection: Option<&LevelRejection>, config: &RetrievalConfig) -> Self {
        match rejection {
            None => RetrievalState::Success(level),
            Some(r) if r.is_fatal() && level == config.max_level => RetrievalState::Invalid,
            Some(r) if r.is_fatal() => RetrievalState::Exhausted,
            Some(_) if level > config.min_level => RetrievalState::TryingLevel(level - 1),
            Some(_) => RetrievalState::Exhausted,
        }
    }

    /// Whether no further levels will be attempted.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetrievalState::TryingLevel(_))
    }
}

/// A successfully retrieved image.
#[derive(Debug)]
pub struct Retrieved {
    /// Chosen level of detail.
    pub level: u8,
    /// Plan the image was cropped with.
    pub plan: LevelPlan,
    /// Cropped image, exactly `plan.width()` by `plan.height()`.
    pub image: RgbImage,
}

/// Outcome of one level attempt.
enum Attempt {
    Accepted(Retrieved),
    Rejected(LevelRejection),
}

/// Retrieves the highest-resolution complete image of a bounding box.
///
/// # Example
///
/// ```no_run
/// use spatialetl_imagery::{AerialImageRetrieval, BoundingBox, RetrievalConfig};
///
/// let retrieval = AerialImageRetrieval::from_config(RetrievalConfig::default())?;
/// let bbox = BoundingBox::new(51.62, -68.45, 51.39, -68.31)?;
/// let level = retrieval.retrieve(&bbox, "manicouagan.png")?;
/// println!("Retrieved at level {}", level);
/// # Ok::<(), spatialetl_imagery::ImageryError>(())
/// ```
#[derive(Debug)]
pub struct AerialImageRetrieval<S: TileSource> {
    source: S,
    detector: NullTileDetector,
    config: RetrievalConfig,
}

impl AerialImageRetrieval<HttpTileFetcher> {
    /// Create a retrieval backed by an HTTP fetcher built from `config`.
    pub fn from_config(config: RetrievalConfig) -> Result<Self> {
        let fetcher = HttpTileFetcher::new(&config)?;
        Self::new(fetcher, config)
    }
}

impl<S: TileSource> AerialImageRetrieval<S> {
    /// Create a retrieval over `source`.
    pub fn new(source: S, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        let probe: QuadKey = config.null_quadkey.parse()?;
        Ok(Self {
            source,
            detector: NullTileDetector::new(probe),
            config,
        })
    }

    /// The tile source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn attempt_level(&self, bbox: &BoundingBox, level: u8) -> Result<Attempt> {
        let plan = match plan_level(
            bbox,
            level,
            self.config.max_image_area,
            self.config.max_tiles,
        ) {
            Ok(plan) => plan,
            Err(rejection) => return Ok(Attempt::Rejected(rejection)),
        };

        debug!(
            level,
            width = plan.width(),
            height = plan.height(),
            tiles = plan.tiles.tile_count(),
            "Trying zoom level"
        );

        let assembler = MosaicAssembler::new(&self.source, &self.detector)
            .with_parallel(self.config.parallel_fetch);
        match assembler.assemble_mosaic(plan.tiles, level)? {
            Assembly::Complete(mosaic) => Ok(Attempt::Accepted(Retrieved {
                level,
                plan,
                image: plan.crop(&mosaic),
            })),
            Assembly::MissingTile(tile) => {
                Ok(Attempt::Rejected(LevelRejection::IncompleteCoverage { tile }))
            }
        }
    }

    /// Select a level and return the cropped image without writing it.
    pub fn retrieve_image(&self, bbox: &BoundingBox) -> Result<Retrieved> {
        let mut state = RetrievalState::TryingLevel(self.config.max_level);

        while let RetrievalState::TryingLevel(level) = state {
            let rejection = match self.attempt_level(bbox, level)? {
                Attempt::Accepted(retrieved) => {
                    info!(
                        level,
                        width = retrieved.plan.width(),
                        height = retrieved.plan.height(),
                        "Retrieved aerial image"
                    );
                    return Ok(retrieved);
                }
                Attempt::Rejected(rejection) => rejection,
            };

            match &rejection {
                LevelRejection::Degenerate { width, height } if level == self.config.max_level => {
                    error!(
                        level,
                        width,
                        height,
                        "Cannot find a valid aerial imagery for the given bounding box"
                    );
                }
                LevelRejection::Degenerate { width, height } => {
                    warn!(
                        level,
                        width,
                        height,
                        "Bounding box collapses below two pixels, no coarser level can be used"
                    );
                }
                LevelRejection::Oversized { area, max_area } => {
                    warn!(
                        level,
                        area,
                        max_area,
                        "Zoom level cannot be used, image size exceeds the maximum authorized size"
                    );
                }
                LevelRejection::TooManyTiles { tiles, max_tiles } => {
                    warn!(
                        level,
                        tiles,
                        max_tiles,
                        "Zoom level cannot be used, too many tiles to assemble"
                    );
                }
                LevelRejection::IncompleteCoverage { tile } => {
                    warn!(
                        level,
                        tile_x = tile.x,
                        tile_y = tile.y,
                        "Zoom level cannot be used, imagery is incomplete"
                    );
                }
            }
            metrics::counter!(metric_defs::LEVELS_REJECTED.name, "reason" => rejection.reason())
                .increment(1);

            state = RetrievalState::next(level, Some(&rejection), &self.config);
        }

        match state {
            RetrievalState::Invalid => Err(bbox.invalid()),
            _ => Err(ImageryError::NoValidResolution),
        }
    }

    /// Select a level, crop, and write the image to `output`.
    ///
    /// The format follows the file extension. The file is written to a
    /// temporary sibling and renamed into place, so nothing exists at
    /// `output` after a failed retrieval. Returns the chosen level.
    pub fn retrieve<P: AsRef<Path>>(&self, bbox: &BoundingBox, output: P) -> Result<u8> {
        let output = output.as_ref();
        // Resolve the format before any tile is fetched
        let format = ImageFormat::from_path(output)?;

        let retrieved = self.retrieve_image(bbox)?;
        write_image(&retrieved.image, output, format)?;
        info!(level = retrieved.level, path = %output.display(), "Wrote aerial image");
        Ok(retrieved.level)
    }
}

fn write_image(image: &RgbImage, output: &Path, format: ImageFormat) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        image.write_to(&mut writer, format)?;
        writer.flush()?;
    }
    temp.persist(output).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_system::{MAX_LEVEL, MIN_LEVEL};

    fn scenario_bbox() -> BoundingBox {
        BoundingBox::new(51.62, -68.45, 51.39, -68.31).unwrap()
    }

    #[test]
    fn test_plan_rejects_identical_corners() {
        let bbox = BoundingBox::new(10.0, 10.0, 10.0, 10.0).unwrap();
        let rejection = plan_level(&bbox, MAX_LEVEL, u64::MAX, u64::MAX).unwrap_err();
        assert_eq!(rejection, LevelRejection::Degenerate { width: 0, height: 0 });
        assert!(rejection.is_fatal());
    }

    #[test]
    fn test_plan_rejects_oversized() {
        let bbox = scenario_bbox();
        let rejection = plan_level(&bbox, 19, 11_366_912, u64::MAX).unwrap_err();
        assert!(matches!(rejection, LevelRejection::Oversized { .. }));
        assert!(!rejection.is_fatal());
    }

    #[test]
    fn test_plan_rejects_too_many_tiles() {
        let bbox = scenario_bbox();
        // 8 x 18 tiles at level 14
        let rejection = plan_level(&bbox, 14, u64::MAX, 100).unwrap_err();
        assert_eq!(
            rejection,
            LevelRejection::TooManyTiles {
                tiles: 144,
                max_tiles: 100
            }
        );
        assert!(!rejection.is_fatal());
        assert_eq!(rejection.reason(), "too_many_tiles");
        assert!(plan_level(&bbox, 14, u64::MAX, 144).is_ok());
    }

    #[test]
    fn test_thin_box_capped_by_tile_count() {
        // Two pixels tall and millions of pixels wide at level 23: the
        // cropped area fits the default budget but the mosaic would not
        let config = RetrievalConfig::default();
        let bbox = BoundingBox::new(10.0, 0.0, 9.99999965, 0.5).unwrap();
        let (width, height) = bbox.pixel_span(MAX_LEVEL);
        assert_eq!(height, 2);
        assert!((width as u64) * (height as u64) <= config.max_image_area);

        let rejection =
            plan_level(&bbox, MAX_LEVEL, config.max_image_area, config.max_tiles).unwrap_err();
        assert!(matches!(rejection, LevelRejection::TooManyTiles { .. }));
    }

    #[test]
    fn test_plan_tiles_cover_box() {
        let bbox = scenario_bbox();
        let plan = plan_level(&bbox, 12, u64::MAX, u64::MAX).unwrap();
        let origin = plan.mosaic_origin();
        assert!(origin.x <= plan.top_left.x && plan.top_left.x - origin.x < 256);
        assert!(origin.y <= plan.top_left.y && plan.top_left.y - origin.y < 256);

        let end_x = origin.x + plan.tiles.columns() as i64 * 256;
        let end_y = origin.y + plan.tiles.rows() as i64 * 256;
        assert!(plan.bottom_right.x < end_x);
        assert!(plan.bottom_right.y < end_y);
    }

    #[test]
    fn test_first_fitting_level_under_default_budget() {
        let bbox = scenario_bbox();
        let config = RetrievalConfig::default();
        let (budget, cap) = (config.max_image_area, config.max_tiles);
        let first = (MIN_LEVEL..=MAX_LEVEL)
            .rev()
            .find(|&l| plan_level(&bbox, l, budget, cap).is_ok())
            .unwrap();
        assert_eq!(first, 14);
        assert!(plan_level(&bbox, 15, budget, cap).is_err());
    }

    #[test]
    fn test_state_transitions() {
        let oversized = LevelRejection::Oversized { area: 10, max_area: 5 };
        let too_many = LevelRejection::TooManyTiles {
            tiles: 2048,
            max_tiles: 1024,
        };
        let missing = LevelRejection::IncompleteCoverage {
            tile: TileIndex::new(1, 1),
        };
        let degenerate = LevelRejection::Degenerate { width: 1, height: 40 };

        let config = RetrievalConfig::default();
        let narrow = RetrievalConfig {
            min_level: 9,
            max_level: 12,
            ..RetrievalConfig::default()
        };

        assert_eq!(RetrievalState::next(17, None, &config), RetrievalState::Success(17));
        assert_eq!(
            RetrievalState::next(17, Some(&oversized), &config),
            RetrievalState::TryingLevel(16)
        );
        assert_eq!(
            RetrievalState::next(23, Some(&too_many), &config),
            RetrievalState::TryingLevel(22)
        );
        assert_eq!(
            RetrievalState::next(2, Some(&missing), &config),
            RetrievalState::TryingLevel(1)
        );
        assert_eq!(RetrievalState::next(1, Some(&missing), &config), RetrievalState::Exhausted);
        assert_eq!(RetrievalState::next(9, Some(&oversized), &narrow), RetrievalState::Exhausted);

        // Degenerate at the finest level is an invalid box; later it ends the search
        assert_eq!(RetrievalState::next(23, Some(&degenerate), &config), RetrievalState::Invalid);
        assert_eq!(RetrievalState::next(12, Some(&degenerate), &narrow), RetrievalState::Invalid);
        assert_eq!(RetrievalState::next(4, Some(&degenerate), &config), RetrievalState::Exhausted);

        assert!(!RetrievalState::TryingLevel(3).is_terminal());
        assert!(RetrievalState::Exhausted.is_terminal());
    }

    #[test]
    fn test_crop_exact_dimensions() {
        let bbox = scenario_bbox();
        let plan = plan_level(&bbox, 10, u64::MAX, u64::MAX).unwrap();
        let mosaic = RgbImage::new(plan.tiles.columns() * 256, plan.tiles.rows() * 256);

        let cropped = plan.crop(&mosaic);
        assert_eq!(cropped.width() as i64, plan.bottom_right.x - plan.top_left.x);
        assert_eq!(cropped.height() as i64, plan.bottom_right.y - plan.top_left.y);
    }
}
