//! End-to-end retrieval tests against an in-memory tile service.
//!
//! The fake service paints each tile a solid colour derived from its index
//! and level, and answers the null probe (and any tile it declares
//! unavailable) with a fixed placeholder image.

use image::Rgb;
use spatialetl_imagery::tile_system::{pixel_to_tile, quadkey_to_tile};
use spatialetl_imagery::{
    plan_level, AerialImageRetrieval, BoundingBox, ImageryError, QuadKey, RetrievalConfig,
    TileIndex, TileRaster, TileSource, DEFAULT_NULL_QUADKEY,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

const PLACEHOLDER: Rgb<u8> = Rgb([200, 200, 200]);

type Availability = Box<dyn Fn(TileIndex, u8) -> bool + Send + Sync>;

struct FakeTileService {
    available: Availability,
    calls: AtomicUsize,
}

impl FakeTileService {
    fn new(available: impl Fn(TileIndex, u8) -> bool + Send + Sync + 'static) -> Self {
        Self {
            available: Box::new(available),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn tile_colour(tile: TileIndex, level: u8) -> Rgb<u8> {
    Rgb([(tile.x % 251) as u8, (tile.y % 251) as u8, level])
}

impl TileSource for FakeTileService {
    fn fetch(&self, quadkey: &QuadKey) -> spatialetl_imagery::Result<TileRaster> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if quadkey.as_str() == DEFAULT_NULL_QUADKEY {
            return Ok(TileRaster::from_pixel(256, 256, PLACEHOLDER));
        }
        let (tile, level) = quadkey_to_tile(quadkey.as_str())?;
        if !(self.available)(tile, level) {
            return Ok(TileRaster::from_pixel(256, 256, PLACEHOLDER));
        }
        Ok(TileRaster::from_pixel(256, 256, tile_colour(tile, level)))
    }
}

fn scenario_bbox() -> BoundingBox {
    BoundingBox::new(51.62, -68.45, 51.39, -68.31).unwrap()
}

#[test]
fn test_selects_first_level_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("aerial.bmp");
    let service = FakeTileService::new(|_, level| level <= 19);
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();

    let level = retrieval.retrieve(&scenario_bbox(), &output).unwrap();
    assert_eq!(level, 14);

    let config = RetrievalConfig::default();
    let plan = plan_level(&scenario_bbox(), 14, config.max_image_area, config.max_tiles).unwrap();
    let (width, height) = image::image_dimensions(&output).unwrap();
    assert_eq!((width, height), (plan.width(), plan.height()));
    assert_eq!((width, height), (1631, 4305));

    // Oversized levels are rejected without fetching: one probe plus the level 14 tiles
    assert_eq!(service.calls() as u64, 1 + plan.tiles.tile_count());
}

#[test]
fn test_falls_back_when_coverage_incomplete() {
    let service = FakeTileService::new(|_, level| level <= 12);
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();

    let retrieved = retrieval.retrieve_image(&scenario_bbox()).unwrap();
    assert_eq!(retrieved.level, 12);
    assert_eq!(retrieved.image.dimensions(), (408, 1076));
}

#[test]
fn test_missing_tile_at_every_level_exhausts() {
    let bbox = scenario_bbox();
    // The tile under the box's bottom-right corner is missing at every level
    let service = FakeTileService::new(move |tile, level| {
        let (_, bottom_right) = bbox.pixel_bounds(level);
        tile != pixel_to_tile(bottom_right)
    });
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("aerial.png");
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();

    let err = retrieval.retrieve(&bbox, &output).unwrap_err();
    assert!(matches!(err, ImageryError::NoValidResolution), "got {:?}", err);
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_identical_corners_make_no_requests() {
    let service = FakeTileService::new(|_, _| true);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("aerial.png");
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();
    let bbox = BoundingBox::new(51.5, -68.4, 51.5, -68.4).unwrap();

    let err = retrieval.retrieve(&bbox, &output).unwrap_err();
    assert!(matches!(err, ImageryError::InvalidBoundingBox { .. }), "got {:?}", err);
    assert_eq!(service.calls(), 0);
    assert!(!output.exists());
}

#[test]
fn test_sub_pixel_box_is_invalid() {
    let service = FakeTileService::new(|_, _| true);
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();
    // About 1 cm wide: below two pixels even at level 23
    let bbox = BoundingBox::new(51.5, -68.4, 51.4, -68.4000001).unwrap();

    let err = retrieval.retrieve_image(&bbox).unwrap_err();
    assert!(matches!(err, ImageryError::InvalidBoundingBox { .. }));
    assert_eq!(service.calls(), 0);
}

#[test]
fn test_unknown_extension_fails_before_fetching() {
    let service = FakeTileService::new(|_, _| true);
    let dir = tempfile::tempdir().unwrap();
    let retrieval = AerialImageRetrieval::new(&service, RetrievalConfig::default()).unwrap();

    let err = retrieval
        .retrieve(&scenario_bbox(), dir.path().join("aerial.unknown"))
        .unwrap_err();
    assert!(matches!(err, ImageryError::Image(_)), "got {:?}", err);
    assert_eq!(service.calls(), 0);
}

#[test]
fn test_fetch_error_aborts_retrieval() {
    struct Unreachable;
    impl TileSource for Unreachable {
        fn fetch(&self, quadkey: &QuadKey) -> spatialetl_imagery::Result<TileRaster> {
            Err(ImageryError::TileFetch {
                quadkey: quadkey.to_string(),
                reason: "connection refused".to_string(),
                transient: true,
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("aerial.png");
    let retrieval = AerialImageRetrieval::new(Unreachable, RetrievalConfig::default()).unwrap();

    let err = retrieval.retrieve(&scenario_bbox(), &output).unwrap_err();
    assert!(matches!(err, ImageryError::TileFetch { .. }), "got {:?}", err);
    assert!(!output.exists());
}

#[test]
fn test_crop_aligns_with_tiles() {
    let service = FakeTileService::new(|_, _| true);
    let config = RetrievalConfig {
        max_image_area: 200_000,
        ..RetrievalConfig::default()
    };
    let retrieval = AerialImageRetrieval::new(&service, config).unwrap();

    let retrieved = retrieval.retrieve_image(&scenario_bbox()).unwrap();
    assert_eq!(retrieved.level, 11);

    let plan = retrieved.plan;
    let image = &retrieved.image;
    assert_eq!(image.dimensions(), (plan.width(), plan.height()));

    // Each output pixel carries the colour of the tile its global pixel falls in
    for (x, y) in [(0, 0), (plan.width() - 1, plan.height() - 1), (plan.width() / 2, 300)] {
        let global = spatialetl_imagery::PixelCoord::new(
            plan.top_left.x + x as i64,
            plan.top_left.y + y as i64,
        );
        assert_eq!(
            *image.get_pixel(x, y),
            tile_colour(pixel_to_tile(global), 11),
            "pixel ({}, {})",
            x,
            y
        );
    }
}

#[test]
fn test_parallel_fetch_matches_sequential() {
    let sequential_service = FakeTileService::new(|_, level| level <= 12);
    let parallel_service = FakeTileService::new(|_, level| level <= 12);
    let config = RetrievalConfig {
        max_image_area: 500_000,
        ..RetrievalConfig::default()
    };

    let sequential = AerialImageRetrieval::new(&sequential_service, config.clone()).unwrap();
    let parallel = AerialImageRetrieval::new(
        &parallel_service,
        RetrievalConfig {
            parallel_fetch: true,
            ..config
        },
    )
    .unwrap();

    let a = sequential.retrieve_image(&scenario_bbox()).unwrap();
    let b = parallel.retrieve_image(&scenario_bbox()).unwrap();
    assert_eq!(a.level, 12);
    assert_eq!(a.level, b.level);
    assert_eq!(a.image, b.image);
    // A single probe even with concurrent first use
    assert_eq!(parallel_service.calls(), sequential_service.calls());
}

#[test]
fn test_null_probe_fetched_once_per_retrieval_instance() {
    let service = FakeTileService::new(|_, _| true);
    let config = RetrievalConfig {
        max_image_area: 200_000,
        ..RetrievalConfig::default()
    };
    let retrieval = AerialImageRetrieval::new(&service, config.clone()).unwrap();
    let plan = plan_level(&scenario_bbox(), 11, config.max_image_area, config.max_tiles).unwrap();

    retrieval.retrieve_image(&scenario_bbox()).unwrap();
    retrieval.retrieve_image(&scenario_bbox()).unwrap();
    assert_eq!(service.calls() as u64, 1 + 2 * plan.tiles.tile_count());
}

#[test]
fn test_tile_cap_falls_back_to_coarser_level() {
    // Level 14 needs 144 tiles and level 13 needs 40; level 12 needs 12
    let service = FakeTileService::new(|_, _| true);
    let config = RetrievalConfig {
        max_tiles: 20,
        ..RetrievalConfig::default()
    };
    let retrieval = AerialImageRetrieval::new(&service, config).unwrap();

    let retrieved = retrieval.retrieve_image(&scenario_bbox()).unwrap();
    assert_eq!(retrieved.level, 12);
    assert_eq!(retrieved.image.dimensions(), (408, 1076));
    // Capped levels are rejected before any request
    assert_eq!(service.calls() as u64, 1 + retrieved.plan.tiles.tile_count());
    assert_eq!(retrieved.plan.tiles.tile_count(), 12);
}

#[test]
fn test_level_range_is_configurable() {
    let service = FakeTileService::new(|_, _| true);
    let config = RetrievalConfig::from_yaml_str("max_level: 9\nmin_level: 8\n").unwrap();
    let retrieval = AerialImageRetrieval::new(&service, config).unwrap();

    assert_eq!(retrieval.retrieve_image(&scenario_bbox()).unwrap().level, 9);
}

#[test]
fn test_output_written_with_extension_format() {
    let service = FakeTileService::new(|_, _| true);
    let config = RetrievalConfig {
        max_image_area: 50_000,
        ..RetrievalConfig::default()
    };
    let retrieval = AerialImageRetrieval::new(&service, config).unwrap();
    let dir = tempfile::tempdir().unwrap();

    for name in ["aerial.png", "aerial.jpg", "aerial.tif"] {
        let output = dir.path().join(name);
        let level = retrieval.retrieve(&scenario_bbox(), &output).unwrap();
        assert_eq!(level, 10);
        assert!(Path::new(&output).exists(), "{} not written", name);
        assert_eq!(image::image_dimensions(&output).unwrap(), (102, 269));
    }
}
